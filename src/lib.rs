// devlink - interactive client for embedded devices over Bluetooth RFCOMM or serial
//
// One logical connection carries both synchronous command/response exchanges
// and an unsolicited telemetry stream, with no framing to tell them apart.

pub mod config;
pub mod connection;
pub mod shell;
pub mod transport;

pub use config::{AppConfig, ConnectionConfig};
pub use connection::{
    ChunkQueue, Connection, IncomingChunk, ListenerFault, ListenerState, Response, SendError,
    TriggerTable,
};
pub use shell::{Shell, ShellExit};
pub use transport::{ConnectError, Endpoint, Transport};
