use std::io;
use thiserror::Error;

/// Errors raised while setting up or running a viewer session.
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported baud rate {0}")]
    UnsupportedBaud(u32),

    #[error("Serial port listing is not supported on {0}")]
    UnsupportedPlatform(&'static str),

    #[error("No serial port selected")]
    NoPortSelected,

    #[error("Serial link lost")]
    LinkLost,
}
