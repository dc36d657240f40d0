// Command Channel
// Single-shot request/response exchange: transmit, settle, poll once, read once.
// There is no correlation id; the first burst after the settle delay is the reply.

use crate::transport::Transport;
use parking_lot::Mutex;
use std::io;
use std::ops::DerefMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{debug, trace};

/// Handle shared between the command path and the stream listener
pub(crate) type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// What the reply wait observed
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReplyOutcome {
    Reply(Vec<u8>),
    /// Nothing arrived within the reply timeout
    Silent,
    /// The stream listener owns the reading handle
    ChannelOwned,
}

pub(crate) struct CommandChannel {
    settle_delay: Duration,
    reply_timeout: Duration,
}

impl CommandChannel {
    pub(crate) fn new(settle_delay: Duration, reply_timeout: Duration) -> Self {
        Self {
            settle_delay,
            reply_timeout,
        }
    }

    /// Write `bytes` through the writing handle
    pub(crate) async fn transmit(writer: &SharedTransport, bytes: Vec<u8>) -> io::Result<()> {
        let writer = Arc::clone(writer);
        tokio::task::spawn_blocking(move || writer.lock().write_all(&bytes))
            .await
            .map_err(join_error)?
    }

    /// Wait for the single reply burst, unless the listener holds the reader
    pub(crate) async fn await_reply(&self, reader: &SharedTransport) -> io::Result<ReplyOutcome> {
        let Some(guard) = reader.try_lock_arc() else {
            debug!("reader owned by stream listener; not awaiting a reply");
            return Ok(ReplyOutcome::ChannelOwned);
        };

        tokio::time::sleep(self.settle_delay).await;

        let timeout = self.reply_timeout;
        let bytes = read_burst(guard, timeout).await?;

        if bytes.is_empty() {
            trace!(?timeout, "no reply");
            Ok(ReplyOutcome::Silent)
        } else {
            Ok(ReplyOutcome::Reply(bytes))
        }
    }
}

/// Poll `reader` once for up to `timeout` and read whatever arrived.
/// An empty buffer means nothing arrived.
pub(crate) async fn read_burst<G>(reader: G, timeout: Duration) -> io::Result<Vec<u8>>
where
    G: DerefMut<Target = Box<dyn Transport>> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        if reader.poll_readable(timeout)? {
            reader.read_available()
        } else {
            Ok(Vec::new())
        }
    })
    .await
    .map_err(join_error)?
}

fn join_error(e: JoinError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}
