// Transport Traits and Core Types
// Defines the byte-stream Transport trait, endpoint addressing and connect errors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default RFCOMM channel used by the serial port profile
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Default UART baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default upper bound for a single read
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// A connected byte-stream endpoint.
///
/// Implementations must honour two rules on `poll_readable`: it never blocks
/// longer than `timeout`, and it never consumes the bytes it reports.
///
/// Closing any handle obtained through `try_clone` closes the underlying
/// resource for every clone, so a poll in progress elsewhere fails promptly.
pub trait Transport: Send {
    /// Write every byte or fail
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` for at least one readable byte
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Non-blocking best-effort read; may return an empty buffer
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Close the handle. Idempotent.
    fn close(&mut self);

    /// Whether the underlying resource is still open
    fn is_open(&self) -> bool;

    /// Obtain a second handle on the same OS resource
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

/// Error returned by any operation attempted on a closed transport
pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is closed")
}

// ============================================================================
// BLUETOOTH DEVICE ADDRESS
// ============================================================================

/// 48-bit Bluetooth device address, stored most significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Byte order expected by the kernel's `sockaddr_rc`
    pub fn to_le_bytes(&self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }
}

impl FromStr for BdAddr {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConnectError::NotFound(format!("invalid Bluetooth address: {}", s));

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

// ============================================================================
// ENDPOINT
// ============================================================================

/// A resolved device endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    /// Bluetooth RFCOMM socket
    Bluetooth { address: BdAddr, channel: u8 },
    /// USB/UART serial port
    Serial { path: String, baud_rate: u32 },
}

impl Endpoint {
    /// Bluetooth endpoint on the default RFCOMM channel
    pub fn bluetooth(address: &str) -> Result<Self, ConnectError> {
        Ok(Self::Bluetooth {
            address: address.parse()?,
            channel: DEFAULT_RFCOMM_CHANNEL,
        })
    }

    /// Serial endpoint at the default baud rate
    pub fn serial(path: &str) -> Self {
        Self::Serial {
            path: path.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn with_channel(self, channel: u8) -> Self {
        match self {
            Self::Bluetooth { address, .. } => Self::Bluetooth { address, channel },
            other => other,
        }
    }

    pub fn with_baud_rate(self, baud_rate: u32) -> Self {
        match self {
            Self::Serial { path, .. } => Self::Serial { path, baud_rate },
            other => other,
        }
    }

    pub fn is_bluetooth(&self) -> bool {
        matches!(self, Self::Bluetooth { .. })
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial { .. })
    }

    /// Open the OS handle for this endpoint. Blocks until the socket or port is open.
    pub fn open(&self, read_buffer_size: usize) -> Result<Box<dyn Transport>, ConnectError> {
        match self {
            Self::Bluetooth { address, channel } => {
                open_bluetooth(*address, *channel, read_buffer_size)
            }
            Self::Serial { path, baud_rate } => {
                let transport = super::serial::SerialTransport::open(path, *baud_rate)?;
                Ok(Box::new(transport))
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn open_bluetooth(
    address: BdAddr,
    channel: u8,
    read_buffer_size: usize,
) -> Result<Box<dyn Transport>, ConnectError> {
    let transport = super::bluetooth::BluetoothTransport::connect(address, channel, read_buffer_size)?;
    Ok(Box::new(transport))
}

#[cfg(not(target_os = "linux"))]
fn open_bluetooth(
    _address: BdAddr,
    _channel: u8,
    _read_buffer_size: usize,
) -> Result<Box<dyn Transport>, ConnectError> {
    Err(ConnectError::IoFailure(
        "RFCOMM sockets are only supported on Linux".to_string(),
    ))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bluetooth { address, channel } => write!(f, "rfcomm://{}#{}", address, channel),
            Self::Serial { path, baud_rate } => write!(f, "serial://{}@{}", path, baud_rate),
        }
    }
}

// ============================================================================
// CONNECT ERRORS
// ============================================================================

/// Errors that can occur while establishing a connection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Endpoint not found: {0}")]
    NotFound(String),

    #[error("IO failure while connecting: {0}")]
    IoFailure(String),

    #[error("Already connected")]
    AlreadyConnected,
}

impl ConnectError {
    /// Classify an OS error raised while opening a socket or port
    pub fn from_io(err: io::Error) -> Self {
        if is_unresolved(&err) {
            Self::NotFound(err.to_string())
        } else {
            Self::IoFailure(err.to_string())
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

fn is_unresolved(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::EHOSTDOWN) | Some(libc::EHOSTUNREACH)
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}
