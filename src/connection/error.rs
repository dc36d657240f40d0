// Connection Errors
// Failures of the command path and of the stream listener

use thiserror::Error;

/// Errors returned by `Connection::send_command`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("Not connected")]
    NotConnected,

    #[error("IO failure: {0}")]
    IoFailure(String),

    #[error("Another command is still awaiting its reply")]
    Busy,
}

impl SendError {
    /// Whether the connection is gone after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotConnected | Self::IoFailure(_))
    }
}

/// Permanent transport failure observed by the stream listener
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListenerFault {
    #[error("Peer closed the link")]
    PeerClosed,

    #[error("Stream read failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for ListenerFault {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::PeerClosed,
            _ => Self::Io(e.to_string()),
        }
    }
}
