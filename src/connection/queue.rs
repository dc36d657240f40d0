// Incoming Chunks and the Shared Chunk Queue
// FIFO handoff between the stream listener (producer) and external consumers

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

// ============================================================================
// INCOMING CHUNK
// ============================================================================

/// Bytes returned by one transport read, decoded permissively.
///
/// Boundaries are whatever the transport delivered; they carry no meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingChunk {
    seq: u64,
    raw: Vec<u8>,
    text: String,
}

/// A command reply is a single chunk
pub type Response = IncomingChunk;

impl IncomingChunk {
    /// Decode `raw` as UTF-8, replacing invalid sequences
    pub fn new(seq: u64, raw: Vec<u8>) -> Self {
        let text = String::from_utf8_lossy(&raw).into_owned();
        Self { seq, raw, text }
    }

    /// Arrival order within the connection
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl fmt::Display for IncomingChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Stamps chunks with a per-connection arrival sequence
#[derive(Debug, Clone, Default)]
pub(crate) struct ChunkSequencer(Arc<AtomicU64>);

impl ChunkSequencer {
    pub(crate) fn chunk(&self, raw: Vec<u8>) -> IncomingChunk {
        let seq = self.0.fetch_add(1, Ordering::Relaxed);
        IncomingChunk::new(seq, raw)
    }
}

// ============================================================================
// CHUNK QUEUE
// ============================================================================

/// Chunks kept when nobody consumes the queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct QueueInner {
    chunks: Mutex<VecDeque<IncomingChunk>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

/// Bounded multi-producer, multi-consumer FIFO of stream chunks.
/// When full, pushing evicts the oldest chunk. Clones share the same queue.
#[derive(Clone)]
pub struct ChunkQueue {
    inner: Arc<QueueInner>,
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue holding at most `capacity` chunks (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                chunks: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Chunks evicted because the queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn push(&self, chunk: IncomingChunk) {
        {
            let mut chunks = self.inner.chunks.lock();
            if chunks.len() >= self.inner.capacity {
                chunks.pop_front();
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            chunks.push_back(chunk);
        }
        self.inner.notify.notify_one();
    }

    /// Oldest chunk, if any
    pub fn pop(&self) -> Option<IncomingChunk> {
        self.inner.chunks.lock().pop_front()
    }

    /// Take every queued chunk in arrival order
    pub fn drain(&self) -> Vec<IncomingChunk> {
        self.inner.chunks.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.chunks.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.chunks.lock().clear();
    }

    /// Wait up to `timeout` for the next chunk
    pub async fn next(&self, timeout: Duration) -> Option<IncomingChunk> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(chunk) = self.pop() {
                return Some(chunk);
            }
            if tokio::time::timeout_at(deadline, self.inner.notify.notified())
                .await
                .is_err()
            {
                return self.pop();
            }
        }
    }
}

impl fmt::Debug for ChunkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}
