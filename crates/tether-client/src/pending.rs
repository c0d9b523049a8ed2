//! Pending request table.

use std::collections::HashMap;

use parking_lot::Mutex;
use tether_core::{Envelope, EnvelopeKind};
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::ClientError;

/// Outcome delivered to a waiting caller.
pub type Settlement = Result<Envelope, ClientError>;

/// In-flight requests keyed by correlation id.
///
/// Every entry leaves the table exactly once: through [`resolve`] when its
/// terminal envelope arrives, or through [`remove`] on timeout or send
/// failure. Whichever comes second finds nothing.
///
/// [`resolve`]: PendingRequests::resolve
/// [`remove`]: PendingRequests::remove
#[derive(Default)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<String, oneshot::Sender<Settlement>>>,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiver its settlement will arrive on.
    pub fn register(&self, id: &str) -> oneshot::Receiver<Settlement> {
        let (tx, rx) = oneshot::channel();
        let _ = self.waiters.lock().insert(id.to_owned(), tx);
        rx
    }

    /// Settle the entry matching `envelope.id`.
    ///
    /// Only terminal envelopes match; a `pong` (or `ping`) carrying a
    /// pending id is never treated as a response. Error envelopes reject
    /// with their message. Returns `true` if an entry was settled.
    pub fn resolve(&self, envelope: Envelope) -> bool {
        if !envelope.is_terminal() {
            return false;
        }
        let Some(tx) = self.waiters.lock().remove(&envelope.id) else {
            debug!(id = %envelope.id, "no pending entry, discarding");
            return false;
        };
        let settlement = match envelope.kind {
            EnvelopeKind::Error => Err(ClientError::Remote(envelope.error.unwrap_or_default())),
            _ => Ok(envelope),
        };
        // caller may have given up already
        let _ = tx.send(settlement);
        true
    }

    /// Drop the entry for `id`. Returns `true` if it was still pending.
    pub fn remove(&self, id: &str) -> bool {
        self.waiters.lock().remove(id).is_some()
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: &str) -> bool {
        self.waiters.lock().contains_key(id)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}
