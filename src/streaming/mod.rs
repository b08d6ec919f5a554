//! Streaming event bus (C4, SPEC_FULL.md §4.4). Ported in meaning from
//! `backend/utils/event_queue.py`'s `StreamingEventQueue`: debounced token
//! batching with a semantic-boundary flush, a 15s consumer heartbeat
//! instead of an indefinite block, and compression stats.

pub mod field_extractor;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

pub use field_extractor::JsonFieldExtractor;

/// Debounce flush period (§4.4, `W`).
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);
/// Consumer heartbeat timeout (§4.4, `H`).
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

const BOUNDARY_CHARS: &[char] = &['.', '!', '?', '。', '！', '？', '\n'];

fn contains_boundary(token: &str) -> bool {
    token.chars().any(|c| BOUNDARY_CHARS.contains(&c))
}

/// What a consumer receives from [`StreamingEventBus::consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A debounced batch of concatenated tokens.
    Chunk(String),
    /// Yielded when no item arrived within `HEARTBEAT_TIMEOUT`, so the
    /// consumer never blocks indefinitely on an idle producer.
    Heartbeat,
    /// Terminal sentinel enqueued by `close()` after the final flush.
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub total_tokens: u64,
    pub total_flushes: u64,
}

impl StreamStats {
    /// Compression ratio: tokens per consumer chunk. Design goal ≥ 5× on
    /// typical discrete-token LM streams (§4.4).
    pub fn compression_ratio(&self) -> f64 {
        if self.total_flushes == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / self.total_flushes as f64
    }
}

struct Inner {
    buffer: String,
    last_flush: Instant,
    stats: StreamStats,
    closed: bool,
}

/// Single-producer/single-consumer event bus (§4.4 "Concurrency contract").
/// `push` is non-blocking; the unbounded channel never applies backpressure
/// to the producer.
pub struct StreamingEventBus {
    inner: Arc<Mutex<Inner>>,
    sender: mpsc::UnboundedSender<StreamEvent>,
    receiver: Mutex<mpsc::UnboundedReceiver<StreamEvent>>,
    _timer_handle: tokio::task::JoinHandle<()>,
}

impl StreamingEventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(Inner {
            buffer: String::new(),
            last_flush: Instant::now(),
            stats: StreamStats::default(),
            closed: false,
        }));

        let timer_inner = Arc::clone(&inner);
        let timer_sender = sender.clone();
        let timer_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEBOUNCE_WINDOW);
            loop {
                interval.tick().await;
                let mut guard = timer_inner.lock().await;
                if guard.closed {
                    break;
                }
                if !guard.buffer.is_empty() && guard.last_flush.elapsed() >= DEBOUNCE_WINDOW {
                    Self::flush_locked(&mut guard, &timer_sender);
                }
            }
        });

        Self {
            inner,
            sender,
            receiver: Mutex::new(receiver),
            _timer_handle: timer_handle,
        }
    }

    fn flush_locked(inner: &mut Inner, sender: &mpsc::UnboundedSender<StreamEvent>) {
        if inner.buffer.is_empty() {
            return;
        }
        let chunk = std::mem::take(&mut inner.buffer);
        inner.last_flush = Instant::now();
        inner.stats.total_flushes += 1;
        let _ = sender.send(StreamEvent::Chunk(chunk));
    }

    /// Enqueue one LM token. Flushes immediately if `token` contains a
    /// semantic boundary character; otherwise buffers for the debounce
    /// timer to flush.
    pub async fn push(&self, token: &str) {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return;
        }
        guard.buffer.push_str(token);
        guard.stats.total_tokens += 1;
        if contains_boundary(token) {
            Self::flush_locked(&mut guard, &self.sender);
        }
    }

    /// Final flush, then enqueue the terminal sentinel. Idempotent.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return;
        }
        Self::flush_locked(&mut guard, &self.sender);
        guard.closed = true;
        let _ = self.sender.send(StreamEvent::Closed);
    }

    /// Await the next event, yielding a [`StreamEvent::Heartbeat`] instead of
    /// blocking when nothing arrives within [`HEARTBEAT_TIMEOUT`].
    pub async fn consume(&self) -> StreamEvent {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(HEARTBEAT_TIMEOUT, receiver.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => StreamEvent::Closed,
            Err(_elapsed) => StreamEvent::Heartbeat,
        }
    }

    pub async fn get_stats(&self) -> StreamStats {
        self.inner.lock().await.stats.clone()
    }
}

impl Drop for StreamingEventBus {
    fn drop(&mut self) {
        self._timer_handle.abort();
    }
}

impl Default for StreamingEventBus {
    fn default() -> Self {
        Self::new()
    }
}
