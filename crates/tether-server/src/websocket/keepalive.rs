//! Keepalive probing.
//!
//! Pongs are recorded on the connection but never enforced: a silent
//! client is not disconnected by this loop.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tether_core::Envelope;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::metrics::WS_PINGS_SENT_TOTAL;

/// Shortest interval the probe will run at; smaller values are raised to it.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(100);

/// Why the keepalive loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveResult {
    /// The connection was closed; the liveness token fired.
    Cancelled,
    /// A tick found the connection no longer open.
    Closed,
}

/// Send a `ping` envelope every `interval` while the connection is open.
///
/// The first ping goes out one full interval after the call.
pub async fn run_keepalive(connection: Arc<ClientConnection>, interval: Duration) -> KeepaliveResult {
    let cancel = connection.liveness_token();
    let interval = interval.max(MIN_PING_INTERVAL);
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(key = %connection.key, "keepalive cancelled");
                return KeepaliveResult::Cancelled;
            }
            _ = ticker.tick() => {
                if !connection.is_open() {
                    return KeepaliveResult::Closed;
                }
                if connection.send_envelope(&Envelope::ping()) {
                    counter!(WS_PINGS_SENT_TOTAL).increment(1);
                } else if connection.is_open() {
                    warn!(key = %connection.key, "ping dropped, outbound queue full");
                }
            }
        }
    }
}
