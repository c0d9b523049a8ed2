//! Authenticated client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tether_core::{ConnectionKey, Envelope, Identity};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A connected, authenticated client.
///
/// Writes never touch the socket directly: they go through a bounded
/// queue drained by the session's single writer task, so concurrent handler
/// completions cannot interleave frames.
pub struct ClientConnection {
    /// Registry key.
    pub key: ConnectionKey,
    /// Identity decoded at handshake.
    pub identity: Identity,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    connected_at: Instant,
    tx: mpsc::Sender<Arc<String>>,
    open: AtomicBool,
    /// Cancelled on close; stops the keepalive probe.
    liveness: CancellationToken,
    last_pong: Mutex<Option<Instant>>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection for `identity` writing into `tx`.
    pub fn new(identity: Identity, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            key: ConnectionKey::new(&identity),
            identity,
            created_at: Utc::now(),
            connected_at: Instant::now(),
            tx,
            open: AtomicBool::new(true),
            liveness: CancellationToken::new(),
            last_pong: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Whether the connection still accepts writes.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mark the connection closed and cancel its keepalive.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn mark_closed(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        if was_open {
            self.liveness.cancel();
        }
        was_open
    }

    /// Token cancelled when the connection closes.
    pub fn liveness_token(&self) -> CancellationToken {
        self.liveness.clone()
    }

    /// Queue a text frame.
    ///
    /// Returns `false` if the connection is closed or the queue is full; a
    /// full queue increments the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize an envelope and queue it.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.to_text() {
            Ok(text) => self.send(Arc::new(text)),
            Err(e) => {
                warn!(id = %envelope.id, error = %e, "failed to serialize envelope");
                false
            }
        }
    }

    /// Record an inbound pong. Advisory only.
    pub fn record_pong(&self) {
        *self.last_pong.lock() = Some(Instant::now());
    }

    /// Time since the last pong, if one was ever received.
    pub fn last_pong_elapsed(&self) -> Option<Duration> {
        self.last_pong.lock().map(|at| at.elapsed())
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
