use std::{
    io::{self, Read, Write},
    thread::sleep,
    time::{Duration, Instant},
};

use attiview::{
    Channels, Orientation, TelemetryRecord,
    error::ViewerError,
    parser::{self, ProtocolVariant},
    ports::{BaudRate, PORT_TIMEOUT},
    reader::{REQUEST_TOKEN, ReadMode},
};
use clap::Parser;
use serialport::SerialPort;
use tracing::{Level, debug, info};

/// Pretends to be a flight controller: writes slowly swinging attitude and
/// stick values to a serial port.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port to write to, e.g. one end of a virtual null-modem pair.
    port: String,

    #[arg(short, long, default_value_t = BaudRate::default().bits_per_second())]
    baud: u32,

    #[arg(long, value_enum, default_value_t)]
    variant: ProtocolVariant,

    /// `stream` sends on a timer, `poll` answers each `getPacket` request.
    #[arg(short, long, value_enum, default_value_t)]
    mode: ReadMode,

    /// Delay between frames in stream mode, in milliseconds.
    #[arg(long, default_value_t = 100)]
    period_ms: u64,
}

fn main() -> Result<(), ViewerError> {
    tracing_subscriber::fmt::fmt()
        .with_max_level(Level::INFO)
        .with_file(false)
        .init();

    let cli = Cli::parse();
    let baud = BaudRate::try_from(cli.baud)?;

    let mut port = serialport::new(&cli.port, baud.bits_per_second())
        .timeout(PORT_TIMEOUT)
        .open()?;

    info!("Simulating {:?} telemetry on {} at {baud} baud ({:?})", cli.variant, cli.port, cli.mode);

    let period = Duration::from_millis(cli.period_ms);
    let started = Instant::now();
    let mut requests = Vec::new();

    loop {
        match cli.mode {
            ReadMode::Stream => sleep(period),
            ReadMode::Poll => {
                if !take_request(&mut port, &mut requests)? {
                    continue;
                }
            }
        }

        let record = synthetic_record(started.elapsed());
        let line = parser::encode(&record, cli.variant);

        port.write_all(line.as_bytes())?;
        port.flush()?;

        debug!("Sent {}", line.trim_end());
    }
}

/// Read whatever the viewer sent and consume one request token, if a whole
/// one has arrived.
fn take_request(port: &mut Box<dyn SerialPort>, pending: &mut Vec<u8>) -> io::Result<bool> {
    let mut buf = [0u8; 64];
    let n = match port.read(&mut buf) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
        Err(e) => return Err(e),
    };
    pending.extend_from_slice(&buf[..n]);

    let Some(pos) = pending
        .windows(REQUEST_TOKEN.len())
        .position(|w| w == REQUEST_TOKEN)
    else {
        // Only the tail can still become a token
        if pending.len() > REQUEST_TOKEN.len() {
            let excess = pending.len() - REQUEST_TOKEN.len();
            pending.drain(..excess);
        }
        return Ok(false);
    };

    pending.drain(..pos + REQUEST_TOKEN.len());
    Ok(true)
}

fn synthetic_record(elapsed: Duration) -> TelemetryRecord {
    let t = elapsed.as_secs_f64();

    TelemetryRecord {
        orientation: Orientation {
            pitch: 30.0 * t.sin(),
            roll: 20.0 * (0.7 * t).sin(),
            yaw: (36.0 * t) % 360.0,
        },
        channels: Some(Channels {
            throttle: 1500.0 + 400.0 * (0.5 * t).sin(),
            pitch: 1500.0 + 300.0 * t.sin(),
            yaw: 1500.0 + 200.0 * (0.3 * t).cos(),
            roll: 1500.0 + 300.0 * (0.7 * t).sin(),
        }),
    }
}
