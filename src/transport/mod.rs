// Transport module - THE WIRE
// Byte-stream endpoints (Bluetooth RFCOMM, serial port) behind one trait

mod traits;
#[cfg(target_os = "linux")]
mod bluetooth;
mod serial;

pub use traits::{
    // Core trait
    Transport,
    // Addressing
    BdAddr, Endpoint,
    // Errors
    ConnectError,
    // Defaults
    DEFAULT_BAUD_RATE, DEFAULT_READ_BUFFER_SIZE, DEFAULT_RFCOMM_CHANNEL,
};

#[cfg(target_os = "linux")]
pub use bluetooth::BluetoothTransport;

pub use serial::SerialTransport;
