use std::fmt;

use crate::Channels;

/// Range shared by every stick channel gauge.
pub const CHANNEL_EXTENTS: (f64, f64) = (1000.0, 2000.0);

/// Value shown before the first frame arrives.
pub const CHANNEL_INITIAL: f64 = 1200.0;

const BAR_WIDTH: usize = 30;

/// A horizontal bar showing where a value sits within its extents.
#[derive(Debug, Clone, PartialEq)]
pub struct Gauge {
    label: &'static str,
    extents: (f64, f64),
    value: f64,
}

impl Gauge {
    /// If the lower extent is above the upper one it is pulled down to it.
    #[must_use]
    pub fn new(label: &'static str, extents: (f64, f64), value: f64) -> Self {
        let (lo, hi) = extents;
        let mut gauge = Self {
            label,
            extents: (lo.min(hi), hi),
            value: 0.0,
        };
        gauge.set_value(value);
        gauge
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    #[must_use]
    pub fn extents(&self) -> (f64, f64) {
        self.extents
    }

    /// Set the value, clipped to the extents.
    pub fn set_value(&mut self, value: f64) {
        let (lo, hi) = self.extents;
        self.value = value.clamp(lo, hi);
    }

    /// How many of `width` cells are filled.
    #[must_use]
    pub fn level(&self, width: usize) -> usize {
        let (lo, hi) = self.extents;
        if hi <= lo {
            return width;
        }
        let fraction = (self.value - lo) / (hi - lo);
        (fraction * width as f64).round() as usize
    }
}

impl fmt::Display for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled = self.level(BAR_WIDTH);
        write!(
            f,
            "{:<9}[{}{}] {:>7.1}",
            self.label,
            "#".repeat(filled),
            ".".repeat(BAR_WIDTH - filled),
            self.value
        )
    }
}

/// The four stick channel gauges.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugePanel {
    pub throttle: Gauge,
    pub pitch: Gauge,
    pub yaw: Gauge,
    pub roll: Gauge,
}

impl Default for GaugePanel {
    fn default() -> Self {
        Self {
            throttle: Gauge::new("Throttle", CHANNEL_EXTENTS, CHANNEL_INITIAL),
            pitch: Gauge::new("Pitch", CHANNEL_EXTENTS, CHANNEL_INITIAL),
            yaw: Gauge::new("Yaw", CHANNEL_EXTENTS, CHANNEL_INITIAL),
            roll: Gauge::new("Roll", CHANNEL_EXTENTS, CHANNEL_INITIAL),
        }
    }
}

impl GaugePanel {
    pub fn apply(&mut self, channels: &Channels) {
        self.throttle.set_value(channels.throttle);
        self.pitch.set_value(channels.pitch);
        self.yaw.set_value(channels.yaw);
        self.roll.set_value(channels.roll);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gauge> {
        [&self.throttle, &self.pitch, &self.yaw, &self.roll].into_iter()
    }
}
