//! Connection registry.
//!
//! The only place connection membership changes. Admission is checked and
//! applied under one write lock, and removal marks the connection closed, so
//! a connection is registered and deregistered exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use tether_core::{ConnectionKey, Envelope, Identity};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::metrics::WS_CONNECTIONS_ACTIVE;
use crate::websocket::connection::ClientConnection;

/// Live authenticated connections keyed by [`ConnectionKey`].
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionKey, Arc<ClientConnection>>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry admitting at most `max_connections`.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a connection.
    ///
    /// Returns `false` when the registry is full or the key is taken.
    pub async fn add(&self, connection: Arc<ClientConnection>) -> bool {
        let mut conns = self.connections.write().await;
        if conns.len() >= self.max_connections {
            warn!(
                key = %connection.key,
                max = self.max_connections,
                "connection refused, registry full"
            );
            return false;
        }
        if conns.contains_key(&connection.key) {
            warn!(key = %connection.key, "duplicate connection key");
            return false;
        }
        let _ = conns.insert(connection.key.clone(), connection);
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
        true
    }

    /// Deregister a connection and mark it closed.
    ///
    /// Returns the entry only for the call that removed it.
    pub async fn remove(&self, key: &ConnectionKey) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write().await;
        let removed = conns.remove(key)?;
        let _ = removed.mark_closed();
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
        debug!(key = %key, remaining = conns.len(), "connection deregistered");
        Some(removed)
    }

    /// Look up a connection.
    pub async fn get(&self, key: &ConnectionKey) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(key).cloned()
    }

    /// Number of registered connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Identities of all registered connections.
    pub async fn identities(&self) -> Vec<Identity> {
        self.connections
            .read()
            .await
            .values()
            .map(|c| c.identity.clone())
            .collect()
    }

    /// Queue an envelope on every open connection.
    ///
    /// Returns how many connections accepted it.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let text = match envelope.to_text() {
            Ok(t) => Arc::new(t),
            Err(e) => {
                warn!(id = %envelope.id, error = %e, "failed to serialize broadcast");
                return 0;
            }
        };
        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.send(Arc::clone(&text)) {
                delivered += 1;
            } else {
                warn!(key = %conn.key, "failed to deliver broadcast");
            }
        }
        debug!(recipients = conns.len(), delivered, "broadcast");
        delivered
    }

    /// Admission cap.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_connection(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = Arc::new(ClientConnection::new(Identity::new(id, "user"), tx));
        (conn, rx)
    }

    #[tokio::test]
    async fn add_and_count() {
        let reg = ConnectionRegistry::new(8);
        let (c1, _rx1) = make_connection("a");
        let (c2, _rx2) = make_connection("a");
        assert!(reg.add(c1).await);
        assert!(reg.add(c2).await);
        // same identity, distinct keys
        assert_eq!(reg.count().await, 2);
    }

    #[tokio::test]
    async fn capacity_enforced() {
        let reg = ConnectionRegistry::new(1);
        let (c1, _rx1) = make_connection("a");
        let (c2, _rx2) = make_connection("b");
        assert!(reg.add(c1).await);
        assert!(!reg.add(c2.clone()).await);
        assert_eq!(reg.count().await, 1);
        assert!(reg.get(&c2.key).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_key_refused() {
        let reg = ConnectionRegistry::new(4);
        let (c1, _rx1) = make_connection("a");
        assert!(reg.add(c1.clone()).await);
        assert!(!reg.add(c1).await);
        assert_eq!(reg.count().await, 1);
    }

    #[tokio::test]
    async fn remove_exactly_once() {
        let reg = ConnectionRegistry::new(4);
        let (c1, _rx1) = make_connection("a");
        let key = c1.key.clone();
        assert!(reg.add(c1.clone()).await);

        let removed = reg.remove(&key).await.unwrap();
        assert!(!removed.is_open());
        assert!(reg.remove(&key).await.is_none());
        assert_eq!(reg.count().await, 0);
        assert!(c1.liveness_token().is_cancelled());
    }

    #[tokio::test]
    async fn concurrent_removal_has_one_winner() {
        let reg = Arc::new(ConnectionRegistry::new(4));
        let (c1, _rx1) = make_connection("a");
        let key = c1.key.clone();
        assert!(reg.add(c1).await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reg = reg.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move { reg.remove(&key).await.is_some() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn identities_listed() {
        let reg = ConnectionRegistry::new(4);
        let (c1, _rx1) = make_connection("alice");
        let (c2, _rx2) = make_connection("bob");
        assert!(reg.add(c1).await);
        assert!(reg.add(c2).await);
        let mut ids: Vec<String> = reg.identities().await.into_iter().map(|i| i.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn broadcast_skips_closed() {
        let reg = ConnectionRegistry::new(4);
        let (c1, mut rx1) = make_connection("a");
        let (c2, mut rx2) = make_connection("b");
        assert!(reg.add(c1).await);
        assert!(reg.add(c2.clone()).await);
        let _ = c2.mark_closed();

        let delivered = reg.broadcast(&Envelope::ping()).await;
        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn slot_freed_after_remove() {
        let reg = ConnectionRegistry::new(1);
        let (c1, _rx1) = make_connection("a");
        let (c2, _rx2) = make_connection("b");
        let key = c1.key.clone();
        assert!(reg.add(c1).await);
        let _ = reg.remove(&key).await;
        assert!(reg.add(c2).await);
        assert_eq!(reg.max_connections(), 1);
    }
}
