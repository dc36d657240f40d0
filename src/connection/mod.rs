// Connection module - THE SESSION
// Connection lifecycle, command/response exchange and stream-mode multiplexing

mod client;
mod command;
mod error;
mod listener;
mod queue;
mod triggers;

pub use client::{Connection, ConnectionStats};
pub use error::{ListenerFault, SendError};
pub use listener::{DisplayCallback, ListenerState};
pub use queue::{ChunkQueue, IncomingChunk, Response, DEFAULT_QUEUE_CAPACITY};
pub use triggers::{ModeChange, TriggerTable};
