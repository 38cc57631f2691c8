pub mod error;
pub mod gauge;
pub mod parser;
pub mod ports;
pub mod reader;
pub mod utils;
pub mod viewer;

use serde::Serialize;
use utils::truncate_float;

/// Every numeric field on the wire is sent multiplied by this factor.
pub const WIRE_SCALE: f64 = 1000.0;

/// Attitude of the remote device, in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Orientation {
    #[serde(serialize_with = "truncate_float")]
    pub pitch: f64,
    #[serde(serialize_with = "truncate_float")]
    pub roll: f64,
    #[serde(serialize_with = "truncate_float")]
    pub yaw: f64,
}

/// Stick channels reported by the extended protocol variant.
///
/// Values are in the receiver's native units (typically 1000-2000 µs).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Channels {
    #[serde(serialize_with = "truncate_float")]
    pub throttle: f64,
    #[serde(serialize_with = "truncate_float")]
    pub pitch: f64,
    #[serde(serialize_with = "truncate_float")]
    pub yaw: f64,
    #[serde(serialize_with = "truncate_float")]
    pub roll: f64,
}

/// One decoded telemetry frame.
///
/// Records are short lived: they are applied to the view state as soon as
/// they are decoded and then dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TelemetryRecord {
    #[serde(rename = "att")]
    pub orientation: Orientation,

    /// Only present for the extended variant
    #[serde(rename = "ch", skip_serializing_if = "Option::is_none")]
    pub channels: Option<Channels>,
}
