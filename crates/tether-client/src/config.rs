//! Client configuration.

use std::time::Duration;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tether_settings::ClientSettings;

/// Configuration for a [`ClientSession`](crate::ClientSession).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// `WebSocket` URL of the server's `/ws` endpoint.
    pub server_url: String,
    /// Per-request deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Fixed reconnect delay in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl ClientConfig {
    /// Per-request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay before each reconnection attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Server URL with the credential appended as the `token` query
    /// parameter, percent-encoded.
    pub fn url_with_token(&self, token: &str) -> String {
        let sep = if self.server_url.contains('?') { '&' } else { '?' };
        let token = utf8_percent_encode(token, NON_ALPHANUMERIC);
        format!("{}{sep}token={token}", self.server_url)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(s: &ClientSettings) -> Self {
        Self {
            server_url: s.server_url.clone(),
            request_timeout_ms: s.request_timeout_ms,
            reconnect_delay_ms: s.reconnect_delay_ms,
        }
    }
}
