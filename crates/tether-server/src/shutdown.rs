//! Server shutdown: stop accepting, close every session, wait for the
//! registry to empty.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;

/// Drain budget when the caller gives none.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the drain re-checks the registry.
const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Owns the server-wide stop signal.
///
/// Sessions watch [`token`](Self::token) and close with `1001` when it
/// fires; each one deregisters itself on the way out, so an empty registry
/// means every session has finished.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl ShutdownCoordinator {
    /// Coordinator draining `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            token: CancellationToken::new(),
            registry,
        }
    }

    /// Stop signal handed to the listener and to each session.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the stop signal without waiting. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether the stop signal has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the stop signal, then wait up to `timeout` for `listeners` to
    /// exit and for every registered session to deregister.
    pub async fn graceful_shutdown(&self, listeners: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let open = self.registry.count().await;

        self.trigger();
        info!(open_sessions = open, listeners = listeners.len(), ?timeout, "draining");

        let drain = async {
            let _ = futures::future::join_all(listeners).await;
            self.sessions_closed().await;
        };
        if tokio::time::timeout(timeout, drain).await.is_ok() {
            info!("drain complete");
        } else {
            warn!(
                remaining = self.registry.count().await,
                "drain timed out after {timeout:?}"
            );
        }
    }

    async fn sessions_closed(&self) {
        while self.registry.count().await > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ClientConnection;
    use tether_core::Identity;
    use tokio::sync::mpsc;

    async fn registry_with_one() -> (Arc<ConnectionRegistry>, Arc<ClientConnection>) {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let (tx, _rx) = mpsc::channel(4);
        let conn = Arc::new(ClientConnection::new(Identity::new("u1", "admin"), tx));
        assert!(registry.add(conn.clone()).await);
        (registry, conn)
    }

    #[test]
    fn trigger_cancels_every_token() {
        let coord = ShutdownCoordinator::new(Arc::new(ConnectionRegistry::new(1)));
        let t1 = coord.token();
        let t2 = coord.token();
        assert!(!coord.is_shutting_down());
        coord.trigger();
        coord.trigger();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled() && t2.is_cancelled());
    }

    #[tokio::test]
    async fn waits_for_sessions_to_deregister() {
        let (registry, conn) = registry_with_one().await;
        let coord = ShutdownCoordinator::new(registry.clone());

        // stands in for a session reacting to the stop signal
        let token = coord.token();
        let reg = registry.clone();
        let session = tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = reg.remove(&conn.key).await;
        });

        coord
            .graceful_shutdown(Vec::new(), Some(Duration::from_secs(5)))
            .await;
        assert_eq!(registry.count().await, 0);
        session.await.unwrap();
    }

    #[tokio::test]
    async fn waits_for_listeners() {
        let coord = ShutdownCoordinator::new(Arc::new(ConnectionRegistry::new(1)));
        let token = coord.token();
        let listener = tokio::spawn(async move { token.cancelled().await });
        coord.graceful_shutdown(vec![listener], None).await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_on_a_session_that_never_leaves() {
        let (registry, _conn) = registry_with_one().await;
        let coord = ShutdownCoordinator::new(registry.clone());
        coord
            .graceful_shutdown(Vec::new(), Some(Duration::from_millis(200)))
            .await;
        assert_eq!(registry.count().await, 1);
    }
}
