// Stream Listener
// Background drain of the transport while streaming mode is active
//
// The listener owns the transport's reading handle for its whole life. It is
// handed an already-acquired guard, so no command can poll between "streaming
// armed" and "listener scheduled".

use crate::connection::queue::{ChunkQueue, ChunkSequencer, IncomingChunk};
use crate::connection::{ConnectionStats, ListenerFault};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::ops::DerefMut;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Receives every streamed chunk as soon as it is read
pub type DisplayCallback = Arc<dyn Fn(&IncomingChunk) + Send + Sync>;

/// Lifecycle of the stream listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    /// No stream has been started on this connection
    Idle,
    Running,
    /// Stopped by cancellation or disconnect
    Stopped,
    /// Stopped by a permanent transport failure
    Faulted(ListenerFault),
}

impl Default for ListenerState {
    fn default() -> Self {
        Self::Idle
    }
}

impl ListenerState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }

    pub fn fault(&self) -> Option<&ListenerFault> {
        match self {
            Self::Faulted(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Connection state the listener reads and writes
pub(crate) struct ListenerContext {
    pub poll_timeout: Duration,
    pub connected: Arc<AtomicBool>,
    pub state: Arc<Mutex<ListenerState>>,
    /// Run id of the listener allowed to write `state`; bumped under the `state` lock
    pub current_run: Arc<AtomicU64>,
    pub queue: ChunkQueue,
    pub display: Option<DisplayCallback>,
    pub sequencer: ChunkSequencer,
    pub stats: Arc<Mutex<ConnectionStats>>,
}

pub(crate) struct StreamListener {
    handle: JoinHandle<ListenerState>,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<ListenerState>>,
}

impl StreamListener {
    /// Mark the stream running and start draining `reader` on the blocking pool
    pub(crate) fn spawn<G>(reader: G, ctx: ListenerContext) -> Self
    where
        G: DerefMut<Target = Box<dyn Transport>> + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let state = Arc::clone(&ctx.state);
        let run = {
            let mut current = state.lock();
            *current = ListenerState::Running;
            ctx.current_run.fetch_add(1, Ordering::AcqRel) + 1
        };

        let flag = Arc::clone(&cancel);
        let handle = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            info!(run, "stream listener started");

            let exit = drain(&mut **reader, &ctx, &flag);
            {
                let mut current = ctx.state.lock();
                if ctx.current_run.load(Ordering::Acquire) == run {
                    *current = exit.clone();
                } else {
                    debug!(run, "stream listener superseded; leaving state untouched");
                }
            }
            // The reading handle is released only after the final state is visible.
            drop(reader);

            info!(run, state = ?exit, "stream listener finished");
            exit
        });

        Self {
            handle,
            cancel,
            state,
        }
    }

    /// Signal cancellation without waiting
    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished() && self.state.lock().is_running()
    }

    /// Signal cancellation and wait up to `timeout` for the loop to exit
    pub(crate) async fn stop(self, timeout: Duration) -> ListenerState {
        self.cancel.store(true, Ordering::Release);

        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                warn!(error = %e, "stream listener task failed");
                ListenerState::Faulted(ListenerFault::Io(e.to_string()))
            }
            Err(_) => {
                warn!(?timeout, "stream listener did not stop in time; detaching it");
                ListenerState::Stopped
            }
        }
    }
}

fn drain(reader: &mut dyn Transport, ctx: &ListenerContext, cancel: &AtomicBool) -> ListenerState {
    loop {
        if cancel.load(Ordering::Acquire) {
            return ListenerState::Stopped;
        }
        if !ctx.connected.load(Ordering::Acquire) {
            debug!("connection dropped; stream listener exiting");
            return ListenerState::Stopped;
        }

        let polled = match reader.poll_readable(ctx.poll_timeout) {
            Ok(true) => reader.read_available(),
            Ok(false) => Ok(Vec::new()),
            Err(e) => Err(e),
        };
        let bytes = match polled {
            Ok(bytes) => bytes,
            Err(e) => {
                if cancel.load(Ordering::Acquire) || !ctx.connected.load(Ordering::Acquire) {
                    // The transport was closed under us by disconnect or by a failed command.
                    return ListenerState::Stopped;
                }
                let fault = ListenerFault::from(e);
                warn!(%fault, "stream transport failed; connection invalidated");
                ctx.connected.store(false, Ordering::Release);
                // Closing one handle closes every clone of the transport.
                reader.close();
                return ListenerState::Faulted(fault);
            }
        };
        if bytes.is_empty() {
            continue;
        }

        trace!(len = bytes.len(), head = %hex::encode(&bytes[..bytes.len().min(16)]), "stream chunk");
        {
            let mut stats = ctx.stats.lock();
            stats.bytes_received += bytes.len() as u64;
            stats.stream_chunks += 1;
        }

        let chunk = ctx.sequencer.chunk(bytes);
        if let Some(display) = &ctx.display {
            display(&chunk);
        }
        ctx.queue.push(chunk);
    }
}
