// Connection - one session with one device
//
// Owns the transport and multiplexes its single byte stream between two readers:
// the command channel (request/response, while not streaming) and the stream
// listener (unsolicited telemetry, while streaming). The transport is cloned via
// `try_clone` into a writing handle any task may use, a reading handle behind a
// mutex that exactly one reader holds at a time, and a handle used only to close.

use crate::config::ConnectionConfig;
use crate::connection::command::{read_burst, CommandChannel, ReplyOutcome, SharedTransport};
use crate::connection::listener::{DisplayCallback, ListenerContext, ListenerState, StreamListener};
use crate::connection::queue::{ChunkQueue, ChunkSequencer, IncomingChunk, Response};
use crate::connection::triggers::ModeChange;
use crate::connection::SendError;
use crate::transport::{ConnectError, Endpoint, Transport};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// CONNECTION STATISTICS
// ============================================================================

/// Counters for one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub commands_sent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub replies_received: u64,
    /// Commands whose reply window closed without data
    pub reply_timeouts: u64,
    pub stream_chunks: u64,
    pub streams_started: u64,
}

// ============================================================================
// LINK
// ============================================================================

/// The handles on an open transport
#[derive(Clone)]
struct Link {
    endpoint: Option<Endpoint>,
    writer: SharedTransport,
    reader: SharedTransport,
    /// Never used for I/O, so closing never waits behind a write or a poll
    closer: SharedTransport,
}

impl Link {
    fn close(&self) {
        self.closer.lock().close();
        // Handles busy in a write or poll fail on their own once the closer is closed.
        if let Some(mut writer) = self.writer.try_lock() {
            writer.close();
        }
        if let Some(mut reader) = self.reader.try_lock() {
            reader.close();
        }
    }
}

// ============================================================================
// CONNECTION
// ============================================================================

/// A session with one device.
///
/// All operations take `&self`; share it as `Arc<Connection>` when commands
/// and disconnects come from different tasks.
pub struct Connection {
    config: ConnectionConfig,
    channel: CommandChannel,
    connected: Arc<AtomicBool>,
    link: Mutex<Option<Link>>,
    listener: Mutex<Option<StreamListener>>,
    listener_state: Arc<Mutex<ListenerState>>,
    listener_run: Arc<AtomicU64>,
    command_gate: tokio::sync::Mutex<()>,
    queue: ChunkQueue,
    display: Option<DisplayCallback>,
    sequencer: ChunkSequencer,
    stats: Arc<Mutex<ConnectionStats>>,
}

impl Connection {
    /// Create a disconnected connection
    pub fn new(config: ConnectionConfig) -> Self {
        let channel = CommandChannel::new(config.settle_delay(), config.reply_timeout());
        let queue = ChunkQueue::with_capacity(config.queue_capacity);
        Self {
            config,
            channel,
            connected: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(None),
            listener: Mutex::new(None),
            listener_state: Arc::new(Mutex::new(ListenerState::Idle)),
            listener_run: Arc::new(AtomicU64::new(0)),
            command_gate: tokio::sync::Mutex::new(()),
            queue,
            display: None,
            sequencer: ChunkSequencer::default(),
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
        }
    }

    /// Call `display` for every streamed chunk, before it is queued
    pub fn with_display<F>(mut self, display: F) -> Self
    where
        F: Fn(&IncomingChunk) + Send + Sync + 'static,
    {
        self.display = Some(Arc::new(display));
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_streaming(&self) -> bool {
        self.listener_state.lock().is_running()
    }

    /// Last known listener state; a fault stays visible after the listener exits
    pub fn listener_state(&self) -> ListenerState {
        self.listener_state.lock().clone()
    }

    /// Chunks delivered by the stream listener, oldest first
    pub fn chunks(&self) -> &ChunkQueue {
        &self.queue
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    /// Endpoint of the current link, if it was opened through `connect`
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.link.lock().as_ref().and_then(|link| link.endpoint.clone())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open `endpoint` and return its welcome banner, if the device sent one
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<Option<IncomingChunk>, ConnectError> {
        if self.is_connected() {
            return Err(ConnectError::AlreadyConnected);
        }

        info!(%endpoint, "connecting");
        let target = endpoint.clone();
        let read_buffer_size = self.config.read_buffer_size;
        let transport = tokio::task::spawn_blocking(move || target.open(read_buffer_size))
            .await
            .map_err(|e| ConnectError::IoFailure(e.to_string()))??;

        self.attach(transport, Some(endpoint.clone())).await
    }

    /// Adopt an already-open transport and return its welcome banner
    pub async fn connect_transport(
        &self,
        transport: Box<dyn Transport>,
    ) -> Result<Option<IncomingChunk>, ConnectError> {
        if self.is_connected() {
            return Err(ConnectError::AlreadyConnected);
        }
        self.attach(transport, None).await
    }

    async fn attach(
        &self,
        mut transport: Box<dyn Transport>,
        endpoint: Option<Endpoint>,
    ) -> Result<Option<IncomingChunk>, ConnectError> {
        let handles = transport
            .try_clone()
            .and_then(|reader| Ok((reader, transport.try_clone()?)));
        let (reader, closer) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                transport.close();
                return Err(ConnectError::IoFailure(e.to_string()));
            }
        };
        let link = Link {
            endpoint,
            writer: Arc::new(Mutex::new(transport)),
            reader: Arc::new(Mutex::new(reader)),
            closer: Arc::new(Mutex::new(closer)),
        };

        {
            let mut slot = self.link.lock();
            if self.connected.load(Ordering::Acquire) {
                link.close();
                return Err(ConnectError::AlreadyConnected);
            }
            if let Some(stale) = slot.replace(link.clone()) {
                debug!("closing link left behind by a failed connection");
                stale.close();
            }
            {
                let mut state = self.listener_state.lock();
                *state = ListenerState::Idle;
                // A listener detached from an earlier link no longer owns the state.
                self.listener_run.fetch_add(1, Ordering::AcqRel);
            }
            self.connected.store(true, Ordering::Release);
        }
        info!("connected");

        self.drain_welcome(&link).await
    }

    /// Best-effort read of whatever the device sends on connect
    async fn drain_welcome(&self, link: &Link) -> Result<Option<IncomingChunk>, ConnectError> {
        let Some(reader) = link.reader.try_lock_arc() else {
            return Ok(None);
        };

        match read_burst(reader, self.config.welcome_timeout()).await {
            Ok(bytes) if bytes.is_empty() => {
                debug!("no welcome banner");
                Ok(None)
            }
            Ok(bytes) => {
                self.stats.lock().bytes_received += bytes.len() as u64;
                let banner = self.sequencer.chunk(bytes);
                debug!(banner = %banner.text().trim_end(), "welcome banner");
                Ok(Some(banner))
            }
            Err(e) => {
                self.invalidate(&e);
                Err(ConnectError::IoFailure(e.to_string()))
            }
        }
    }

    /// Stop any stream, close the transport and mark the connection closed.
    /// Idempotent.
    pub async fn disconnect(&self) {
        self.disarm_streaming().await;

        let link = self.link.lock().take();
        self.connected.store(false, Ordering::Release);

        match link {
            Some(link) => {
                link.close();
                info!("disconnected");
            }
            None => debug!("disconnect on a closed connection"),
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Transmit `command` as-is (no line ending is added).
    ///
    /// While not streaming, waits for a single reply burst and returns it;
    /// `Ok(None)` means the device stayed silent. While streaming, returns
    /// `Ok(None)` right after transmitting. Streaming mode then changes if the
    /// command matches a trigger.
    pub async fn send_command(&self, command: &str) -> Result<Option<Response>, SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        let _gate = self.command_gate.try_lock().map_err(|_| SendError::Busy)?;
        let link = self.live_link().ok_or(SendError::NotConnected)?;

        let bytes = command.as_bytes().to_vec();
        let len = bytes.len() as u64;
        CommandChannel::transmit(&link.writer, bytes)
            .await
            .map_err(|e| self.fail(e))?;
        {
            let mut stats = self.stats.lock();
            stats.commands_sent += 1;
            stats.bytes_sent += len;
        }
        debug!(command = command.trim_end(), "command sent");

        let response = match self.channel.await_reply(&link.reader).await {
            Ok(ReplyOutcome::Reply(bytes)) => {
                let mut stats = self.stats.lock();
                stats.replies_received += 1;
                stats.bytes_received += bytes.len() as u64;
                drop(stats);
                Some(self.sequencer.chunk(bytes))
            }
            Ok(ReplyOutcome::Silent) => {
                self.stats.lock().reply_timeouts += 1;
                None
            }
            Ok(ReplyOutcome::ChannelOwned) => None,
            Err(e) => return Err(self.fail(e)),
        };

        if !self.is_connected() {
            return Err(SendError::IoFailure(
                "connection closed while the command was in flight".to_string(),
            ));
        }

        match self.config.triggers.classify(command) {
            Some(ModeChange::StartStreaming) => self.arm_streaming(&link)?,
            Some(ModeChange::StopStreaming) => self.disarm_streaming().await,
            None => {}
        }

        Ok(response)
    }

    /// Start the stream listener without sending anything. No-op if already streaming.
    pub async fn start_stream(&self) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        let _gate = self.command_gate.lock().await;
        let link = self.live_link().ok_or(SendError::NotConnected)?;
        self.arm_streaming(&link)
    }

    /// Stop the stream listener. No-op if not streaming.
    pub async fn stop_stream(&self) {
        self.disarm_streaming().await;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn live_link(&self) -> Option<Link> {
        if !self.is_connected() {
            return None;
        }
        self.link.lock().clone()
    }

    fn arm_streaming(&self, link: &Link) -> Result<(), SendError> {
        let mut slot = self.listener.lock();
        if slot.as_ref().is_some_and(StreamListener::is_running) {
            debug!("stream already active");
            return Ok(());
        }

        // Taken before the task exists, so no command can poll in between.
        let reader = link.reader.try_lock_arc().ok_or(SendError::Busy)?;
        let ctx = ListenerContext {
            poll_timeout: self.config.stream_poll_timeout(),
            connected: Arc::clone(&self.connected),
            state: Arc::clone(&self.listener_state),
            current_run: Arc::clone(&self.listener_run),
            queue: self.queue.clone(),
            display: self.display.clone(),
            sequencer: self.sequencer.clone(),
            stats: Arc::clone(&self.stats),
        };
        *slot = Some(StreamListener::spawn(reader, ctx));
        self.stats.lock().streams_started += 1;
        Ok(())
    }

    async fn disarm_streaming(&self) {
        let Some(listener) = self.listener.lock().take() else {
            debug!("no active stream");
            return;
        };

        let exit = listener.stop(self.config.stop_join_timeout()).await;
        let mut state = self.listener_state.lock();
        if state.is_running() {
            *state = ListenerState::Stopped;
        }
        info!(?exit, "stream stopped");
    }

    /// First I/O failure kills the connection; the caller must reconnect
    fn invalidate(&self, err: &io::Error) {
        if self.connected.swap(false, Ordering::AcqRel) {
            warn!(error = %err, "I/O failure; connection invalidated");
        }
        if let Some(link) = self.link.lock().take() {
            link.close();
        }
    }

    fn fail(&self, err: io::Error) -> SendError {
        self.invalidate(&err);
        SendError::IoFailure(err.to_string())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.cancel();
        }
        if let Some(link) = self.link.get_mut().take() {
            link.close();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .field("listener_state", &self.listener_state())
            .field("endpoint", &self.endpoint())
            .field("queued", &self.queue.len())
            .finish()
    }
}
