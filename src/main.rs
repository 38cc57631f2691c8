use std::{io, time::Duration};

use attiview::{
    error::ViewerError,
    parser::ProtocolVariant,
    ports::{self, BaudRate, SerialOpener},
    reader::ReadMode,
    viewer::{ConnectionState, Viewer, ViewerConfig},
};
use clap::Parser;
use tokio::{signal, time};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Live attitude and stick channel viewer for a flight controller on a
/// serial port.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port to open. Defaults to the last port found.
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate: 2400, 9600, 14400, 19200, 57600, 115200, 128000 or 256000.
    #[arg(short, long, default_value_t = BaudRate::default().bits_per_second())]
    baud: u32,

    /// Telemetry line format sent by the device.
    #[arg(long, value_enum, default_value_t)]
    variant: ProtocolVariant,

    /// Whether the device streams on its own or answers `getPacket`.
    #[arg(short, long, value_enum, default_value_t)]
    mode: ReadMode,

    /// List serial ports and exit.
    #[arg(short, long)]
    list: bool,

    /// Only consider ports that can actually be opened.
    #[arg(long)]
    probe: bool,

    /// Print each record as a JSON line instead of drawing the dashboard.
    #[arg(long)]
    json: bool,

    /// Redraw interval in milliseconds.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries the dashboard or JSON
    tracing_subscriber::fmt::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_file(false)
        .init();

    match run(cli).await {
        Ok(()) => (),
        Err(Failure::Reported) => std::process::exit(1),
        Err(Failure::Error(e)) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

/// Why `run` gave up.
#[derive(Debug)]
enum Failure {
    /// Already logged where it happened
    Reported,
    Error(ViewerError),
}

impl From<ViewerError> for Failure {
    fn from(e: ViewerError) -> Self {
        Self::Error(e)
    }
}

async fn run(cli: Cli) -> Result<(), Failure> {
    if cli.list {
        for port in ports::list_ports(cli.probe)? {
            println!("{port}");
        }
        return Ok(());
    }

    let mut viewer = Viewer::new(ViewerConfig {
        port: cli.port,
        baud: BaudRate::try_from(cli.baud)?,
        variant: cli.variant,
        mode: cli.mode,
    });

    if viewer.selected_port().is_none() {
        let found = viewer.refresh_ports(cli.probe)?.len();
        info!("Found {found} serial ports");
    }

    if viewer.connect(&SerialOpener).is_err() {
        return Err(Failure::Reported);
    }

    let mut ticker = time::interval(Duration::from_millis(cli.tick_ms));
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => (),
            _ = &mut ctrl_c => {
                info!("Ctrl+C received, disconnecting");
                viewer.disconnect();
                return Ok(());
            }
        }

        viewer.tick();

        let records = viewer.dashboard_mut().take_records();
        if cli.json {
            for record in &records {
                println!("{}", serde_json::to_string(record).map_err(ViewerError::from)?);
            }
        } else {
            viewer.render(&mut io::stdout().lock()).map_err(ViewerError::from)?;
        }

        if viewer.state() == ConnectionState::Disconnected {
            return Err(ViewerError::LinkLost.into());
        }
    }
}
