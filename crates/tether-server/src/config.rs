//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_settings::ServerSettings;

use crate::websocket::keepalive::MIN_PING_INTERVAL;

/// Configuration for the tether server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent authenticated connections.
    pub max_connections: usize,
    /// Keepalive ping interval in milliseconds.
    pub ping_interval_ms: u64,
    /// Deadline for one capability handler in milliseconds.
    pub handler_timeout_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// Keepalive ping interval, never shorter than [`MIN_PING_INTERVAL`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms).max(MIN_PING_INTERVAL)
    }

    /// Handler deadline.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            ping_interval_ms: 30_000,
            handler_timeout_ms: 60_000,
            max_message_size: 4 * 1024 * 1024, // 4 MB
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            ping_interval_ms: s.ping_interval_ms,
            handler_timeout_ms: s.handler_timeout_ms,
            max_message_size: s.max_message_size,
        }
    }
}
