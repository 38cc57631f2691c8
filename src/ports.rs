use std::{fmt, time::Duration};

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serialport::{DataBits, Parity, StopBits};
use tracing::debug;

use crate::{error::ViewerError, reader::Link};

/// Read timeout applied to every port we open.
pub const PORT_TIMEOUT: Duration = Duration::from_millis(50);

/// Baud rates offered to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum BaudRate {
    B2400 = 2400,
    B9600 = 9600,
    B14400 = 14400,
    B19200 = 19200,
    B57600 = 57600,
    #[default]
    B115200 = 115_200,
    B128000 = 128_000,
    B256000 = 256_000,
}

impl BaudRate {
    pub const ALL: [Self; 8] = [
        Self::B2400,
        Self::B9600,
        Self::B14400,
        Self::B19200,
        Self::B57600,
        Self::B115200,
        Self::B128000,
        Self::B256000,
    ];

    #[must_use]
    pub const fn bits_per_second(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ViewerError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_u32(value).ok_or(ViewerError::UnsupportedBaud(value))
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits_per_second())
    }
}

/// Turns a port name and baud rate into a live link.
pub trait PortOpener {
    fn open(&self, path: &str, baud: BaudRate) -> Result<Box<dyn Link>, ViewerError>;
}

/// Opens real serial devices, 8N1.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&self, path: &str, baud: BaudRate) -> Result<Box<dyn Link>, ViewerError> {
        let port = serialport::new(path, baud.bits_per_second())
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .data_bits(DataBits::Eight)
            .timeout(PORT_TIMEOUT)
            .open()?;

        Ok(Box::new(port))
    }
}

/// List the serial ports present on this machine.
///
/// With `probe` set, every port is briefly opened and only the ones that
/// open successfully are kept, which hides busy or inaccessible devices.
pub fn list_ports(probe: bool) -> Result<Vec<String>, ViewerError> {
    if !cfg!(any(unix, windows)) {
        return Err(ViewerError::UnsupportedPlatform(std::env::consts::OS));
    }

    let names = serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name);

    if !probe {
        return Ok(names.collect());
    }

    Ok(names
        .filter(|name| match serialport::new(name, BaudRate::default().bits_per_second()).open() {
            Ok(_) => true,
            Err(e) => {
                debug!("Skipping {name}: {e}");
                false
            }
        })
        .collect())
}
