//! UI-thread side of the viewer.
//!
//! [`Viewer`] owns the connection settings, the frame parser and everything
//! that gets drawn. It never touches the serial port itself: the port lives
//! on the reader thread and only raw chunks come back, once per [`tick`].
//!
//! [`tick`]: Viewer::tick

use std::{collections::VecDeque, fmt, io};

use chrono::{Local, NaiveTime};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::{
    Orientation, TelemetryRecord,
    error::ViewerError,
    gauge::GaugePanel,
    parser::{CommandAssembler, FrameSink, ParseErr, ProtocolVariant},
    ports::{self, BaudRate, PortOpener},
    reader::{self, EventReceiver, ReadMode, ReaderEvent, SerialReader},
};

/// Lines kept in the scrolling log.
pub const LOG_CAPACITY: usize = 500;

/// Log lines shown under the gauges.
const LOG_TAIL: usize = 6;

pub const BAD_DATA: &str = "----------Bad Data----------";

/// Stand-in for the 3D cube: remembers the last orientation and draws it
/// as text.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CubeView {
    orientation: Orientation,
}

impl CubeView {
    pub fn set_orientation(&mut self, pitch: f64, roll: f64, yaw: f64) {
        self.orientation = Orientation { pitch, roll, yaw };
    }

    #[must_use]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }
}

impl fmt::Display for CubeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Orientation { pitch, roll, yaw } = self.orientation;
        write!(f, "pitch {pitch:>+9.3}°  roll {roll:>+9.3}°  yaw {yaw:>+9.3}°")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub at: NaiveTime,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.at.format("%H:%M:%S%.3f"), self.text)
    }
}

/// Bounded scrolling log; the oldest line falls off the top.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl EventLog {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, text: impl Into<String>) {
        // A zero capacity still keeps the latest line
        while self.entries.len() >= self.capacity.max(1) {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at: Local::now().time(),
            text: text.into(),
        });
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the parser feeds into.
#[derive(Debug, Default)]
pub struct Dashboard {
    pub cube: CubeView,
    pub gauges: GaugePanel,
    pub log: EventLog,
    fresh: Vec<TelemetryRecord>,
    records: u64,
    malformed: u64,
}

impl Dashboard {
    /// Records decoded since the last call.
    pub fn take_records(&mut self) -> Vec<TelemetryRecord> {
        std::mem::take(&mut self.fresh)
    }

    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.records
    }

    #[must_use]
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

impl FrameSink for Dashboard {
    fn on_line(&mut self, line: &str) {
        self.log.push(line.replace('\r', ""));
    }

    fn on_record(&mut self, record: TelemetryRecord) {
        let Orientation { pitch, roll, yaw } = record.orientation;
        self.cube.set_orientation(pitch, roll, yaw);

        if let Some(channels) = &record.channels {
            self.gauges.apply(channels);
        }

        self.records += 1;
        self.fresh.push(record);
    }

    fn on_malformed(&mut self, line: &str, err: ParseErr) {
        warn!("{err}: {line:?}");
        self.malformed += 1;
        self.log.push(BAD_DATA);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Start-up settings for a [`Viewer`].
#[derive(Debug, Clone, Default)]
pub struct ViewerConfig {
    pub port: Option<String>,
    pub baud: BaudRate,
    pub variant: ProtocolVariant,
    pub mode: ReadMode,
}

#[derive(Debug)]
struct Session {
    reader: SerialReader,
    events: EventReceiver,
}

/// The controller behind the dashboard.
#[derive(Debug)]
pub struct Viewer {
    parser: CommandAssembler,
    dashboard: Dashboard,
    ports: Vec<String>,
    selected_port: Option<String>,
    baud: BaudRate,
    mode: ReadMode,
    session: Option<Session>,
    rendering: bool,
}

impl Viewer {
    #[must_use]
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            parser: CommandAssembler::new(config.variant),
            dashboard: Dashboard::default(),
            ports: Vec::new(),
            selected_port: config.port,
            baud: config.baud,
            mode: config.mode,
            session: None,
            rendering: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.session.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    #[must_use]
    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn dashboard_mut(&mut self) -> &mut Dashboard {
        &mut self.dashboard
    }

    #[must_use]
    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    #[must_use]
    pub fn selected_port(&self) -> Option<&str> {
        self.selected_port.as_deref()
    }

    #[must_use]
    pub fn baud(&self) -> BaudRate {
        self.baud
    }

    /// Re-enumerate serial ports. When nothing is selected yet the last
    /// port in the list is picked.
    pub fn refresh_ports(&mut self, probe: bool) -> Result<&[String], ViewerError> {
        self.set_ports(ports::list_ports(probe)?);
        Ok(&self.ports)
    }

    fn set_ports(&mut self, ports: Vec<String>) {
        self.ports = ports;
        if self.selected_port.is_none() {
            self.selected_port = self.ports.last().cloned();
        }
    }

    pub fn select_port(&mut self, port: impl Into<String>) {
        let port = port.into();
        self.dashboard.log.push(format!("Selected Port: {port}"));
        self.selected_port = Some(port);
    }

    pub fn select_baud(&mut self, bps: u32) -> Result<(), ViewerError> {
        self.baud = BaudRate::try_from(bps)?;
        self.dashboard.log.push(format!("Selected Baud Rate: {}", self.baud));
        Ok(())
    }

    /// Open the selected port and start a reader on it.
    ///
    /// A failure is logged once and leaves the viewer disconnected.
    pub fn connect(&mut self, opener: &impl PortOpener) -> Result<(), ViewerError> {
        if self.session.is_some() {
            return Ok(());
        }

        match self.start_session(opener) {
            Ok(port) => {
                info!("Connected to {port} at {} baud", self.baud);
                self.dashboard.log.push(format!("Connected to {port} at {} baud", self.baud));
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect: {e}");
                self.dashboard.log.push(format!("Failed to connect: {e}"));
                Err(e)
            }
        }
    }

    fn start_session(&mut self, opener: &impl PortOpener) -> Result<String, ViewerError> {
        let port = self.selected_port.clone().ok_or(ViewerError::NoPortSelected)?;
        let link = opener.open(&port, self.baud)?;

        let (tx, events) = reader::event_channel();
        let reader = SerialReader::spawn(link, self.mode, tx)?;

        self.parser.clear();
        self.session = Some(Session { reader, events });
        self.rendering = true;
        Ok(port)
    }

    /// Stop the reader and wait for it to release the port.
    pub fn disconnect(&mut self) {
        if self.end_session() {
            info!("Disconnected");
            self.dashboard.log.push("Disconnected");
        }
    }

    /// Connect/disconnect button.
    pub fn toggle(&mut self, opener: &impl PortOpener) -> Result<(), ViewerError> {
        match self.state() {
            ConnectionState::Disconnected => self.connect(opener),
            ConnectionState::Connected => {
                self.disconnect();
                Ok(())
            }
        }
    }

    fn end_session(&mut self) -> bool {
        let Some(Session { reader, events }) = self.session.take() else {
            return false;
        };

        reader.abort();
        // Closing the channel unblocks a reader parked on a full queue
        drop(events);
        reader.join();

        self.rendering = false;
        true
    }

    /// Drain everything the reader has sent since the last tick.
    ///
    /// Returns the number of events handled.
    pub fn tick(&mut self) -> usize {
        let mut handled = 0;

        loop {
            let event = match self.session.as_mut() {
                Some(session) => session.events.try_recv(),
                None => break,
            };

            match event {
                Ok(ReaderEvent::Data(chunk)) => {
                    self.parser.feed(&chunk, &mut self.dashboard);
                }
                Ok(ReaderEvent::Disconnected) | Err(TryRecvError::Disconnected) => {
                    warn!("Serial link closed");
                    self.disconnect();
                }
                Err(TryRecvError::Empty) => break,
            }
            handled += 1;
        }

        if handled > 0 {
            debug!("Handled {handled} reader events");
        }
        handled
    }

    /// Draw the last-known state, whether or not anything new arrived.
    pub fn render(&self, out: &mut impl io::Write) -> io::Result<()> {
        if !self.rendering {
            return Ok(());
        }

        let dash = &self.dashboard;

        // Home the cursor and clear the screen
        write!(out, "\x1b[H\x1b[2J")?;
        writeln!(
            out,
            "{} @ {} baud   frames {}  bad {}",
            self.selected_port.as_deref().unwrap_or("-"),
            self.baud,
            dash.records,
            dash.malformed
        )?;
        writeln!(out, "{}", dash.cube)?;
        writeln!(out)?;
        for gauge in dash.gauges.iter() {
            writeln!(out, "{gauge}")?;
        }
        writeln!(out)?;

        let tail: Vec<_> = dash.log.entries().rev().take(LOG_TAIL).collect();
        for entry in tail.into_iter().rev() {
            writeln!(out, "{entry}")?;
        }

        out.flush()
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.end_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{Link, tests::MockLink};
    use std::{
        thread,
        time::{Duration, Instant},
    };

    struct FailingOpener;

    impl PortOpener for FailingOpener {
        fn open(&self, _path: &str, _baud: BaudRate) -> Result<Box<dyn Link>, ViewerError> {
            Err(ViewerError::Io(io::Error::new(io::ErrorKind::ResourceBusy, "device busy")))
        }
    }

    struct MockOpener(MockLink);

    impl PortOpener for MockOpener {
        fn open(&self, _path: &str, _baud: BaudRate) -> Result<Box<dyn Link>, ViewerError> {
            Ok(Box::new(self.0.clone()))
        }
    }

    fn viewer(variant: ProtocolVariant) -> Viewer {
        Viewer::new(ViewerConfig {
            port: Some("/dev/ttyTEST".into()),
            variant,
            ..ViewerConfig::default()
        })
    }

    /// Tick until `done` holds or two seconds pass.
    fn tick_until(viewer: &mut Viewer, done: impl Fn(&Viewer) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done(&*viewer) && Instant::now() < deadline {
            viewer.tick();
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn open_failure_logs_once_and_stays_disconnected() {
        let mut viewer = viewer(ProtocolVariant::Basic);

        assert!(viewer.connect(&FailingOpener).is_err());

        assert_eq!(viewer.state(), ConnectionState::Disconnected);
        assert!(!viewer.is_rendering());
        assert_eq!(viewer.dashboard().log.len(), 1);
        assert!(viewer.dashboard().log.entries().next().unwrap().text.starts_with("Failed to connect"));
    }

    #[test]
    fn connect_without_port_fails() {
        let mut viewer = Viewer::new(ViewerConfig::default());
        let result = viewer.connect(&MockOpener(MockLink::default()));

        assert!(matches!(result, Err(ViewerError::NoPortSelected)));
        assert_eq!(viewer.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn frames_update_cube() {
        let link = MockLink::with_chunks(&[b"pitch=1500,ro", b"ll=-2000,yaw=500\r\n"]);
        let mut viewer = viewer(ProtocolVariant::Basic);

        viewer.connect(&MockOpener(link)).unwrap();
        assert_eq!(viewer.state(), ConnectionState::Connected);
        assert!(viewer.is_rendering());

        tick_until(&mut viewer, |v| v.dashboard().record_count() == 1);

        let o = viewer.dashboard().cube.orientation();
        assert_eq!((o.pitch, o.roll, o.yaw), (-1.5, 2.0, 0.5));
        assert_eq!(viewer.dashboard_mut().take_records().len(), 1);

        viewer.disconnect();
        assert_eq!(viewer.state(), ConnectionState::Disconnected);
        assert!(!viewer.is_rendering());
    }

    #[test]
    fn extended_frames_drive_gauges() {
        let link = MockLink::with_chunks(&[
            b"p=0,r=0,y=0,t=1800000,cp=1500000,cy=1100000,cr=1900000\r\n",
        ]);
        let mut viewer = viewer(ProtocolVariant::Extended);
        viewer.connect(&MockOpener(link)).unwrap();

        tick_until(&mut viewer, |v| v.dashboard().record_count() == 1);

        let gauges = &viewer.dashboard().gauges;
        assert_eq!(gauges.throttle.value(), 1800.0);
        assert_eq!(gauges.pitch.value(), 1500.0);
        assert_eq!(gauges.yaw.value(), 1100.0);
        assert_eq!(gauges.roll.value(), 1900.0);
    }

    #[test]
    fn bad_data_is_logged_without_disconnecting() {
        let link = MockLink::with_chunks(&[b"pitch=1,roll=2\r\n"]);
        let mut viewer = viewer(ProtocolVariant::Basic);
        viewer.connect(&MockOpener(link)).unwrap();

        tick_until(&mut viewer, |v| v.dashboard().malformed_count() == 1);

        assert_eq!(viewer.state(), ConnectionState::Connected);
        assert_eq!(viewer.dashboard().record_count(), 0);
        assert_eq!(viewer.dashboard().cube.orientation(), Orientation::default());
        assert!(viewer.dashboard().log.entries().any(|e| e.text == BAD_DATA));
    }

    #[test]
    fn link_failure_tears_down_session() {
        let link = MockLink {
            fail_when_empty: true,
            ..MockLink::default()
        };
        let mut viewer = viewer(ProtocolVariant::Basic);
        viewer.connect(&MockOpener(link)).unwrap();

        tick_until(&mut viewer, |v| v.state() == ConnectionState::Disconnected);

        assert_eq!(viewer.state(), ConnectionState::Disconnected);
        assert!(!viewer.is_rendering());
        let disconnects = viewer.dashboard().log.entries().filter(|e| e.text == "Disconnected").count();
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn toggle_connects_then_disconnects() {
        let mut viewer = viewer(ProtocolVariant::Basic);
        let opener = MockOpener(MockLink::default());

        viewer.toggle(&opener).unwrap();
        assert_eq!(viewer.state(), ConnectionState::Connected);

        viewer.toggle(&opener).unwrap();
        assert_eq!(viewer.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn selections_are_logged() {
        let mut viewer = Viewer::new(ViewerConfig::default());
        viewer.select_port("/dev/ttyUSB0");
        viewer.select_baud(57600).unwrap();
        assert!(viewer.select_baud(1234).is_err());

        assert_eq!(viewer.selected_port(), Some("/dev/ttyUSB0"));
        assert_eq!(viewer.baud(), BaudRate::B57600);
        let texts: Vec<_> = viewer.dashboard().log.entries().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, ["Selected Port: /dev/ttyUSB0", "Selected Baud Rate: 57600"]);
    }

    #[test]
    fn refresh_defaults_to_last_port() {
        let mut viewer = Viewer::new(ViewerConfig::default());
        viewer.set_ports(vec!["/dev/ttyS0".into(), "/dev/ttyACM0".into()]);
        assert_eq!(viewer.selected_port(), Some("/dev/ttyACM0"));

        viewer.select_port("/dev/ttyS0");
        viewer.set_ports(vec!["/dev/ttyUSB1".into()]);
        assert_eq!(viewer.selected_port(), Some("/dev/ttyS0"));
    }

    #[test]
    fn render_redraws_last_state() {
        let mut viewer = viewer(ProtocolVariant::Basic);
        let mut out = Vec::new();

        viewer.render(&mut out).unwrap();
        assert!(out.is_empty(), "nothing is drawn while disconnected");

        viewer.connect(&MockOpener(MockLink::default())).unwrap();
        viewer.dashboard_mut().cube.set_orientation(1.0, 2.0, 3.0);

        for _ in 0..2 {
            out.clear();
            viewer.render(&mut out).unwrap();
            let text = String::from_utf8(out.clone()).unwrap();
            assert!(text.contains("pitch    +1.000°"));
            assert!(text.contains("Throttle "));
        }
    }

    #[test]
    fn log_is_bounded() {
        let mut log = EventLog::with_capacity(3);
        for i in 0..5 {
            log.push(i.to_string());
        }
        let texts: Vec<_> = log.entries().map(|e| e.text.clone()).collect();
        assert_eq!(texts, ["2", "3", "4"]);
    }

    #[test]
    fn zero_capacity_log_keeps_only_latest() {
        let mut log = EventLog::with_capacity(0);
        for i in 0..5 {
            log.push(i.to_string());
        }
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries().next().unwrap().text, "4");
    }
}
