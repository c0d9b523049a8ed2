//! `/health` endpoint body.

use serde::Serialize;

use crate::server::AppState;

/// Whether the server still admits sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeStatus {
    /// Accepting connections.
    Ok,
    /// Shutdown has fired; live sessions are being closed.
    Draining,
}

/// Snapshot served at `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Serving or draining.
    pub status: ServeStatus,
    /// Seconds since the server was built.
    pub uptime_secs: u64,
    /// Registered sessions.
    pub connections: usize,
    /// Registry capacity.
    pub max_connections: usize,
    /// Tools offered to clients.
    pub tools: usize,
    /// Resources offered to clients.
    pub resources: usize,
}

impl HealthReport {
    /// Read the live counters behind `state`.
    pub async fn collect(state: &AppState) -> Self {
        let capabilities = state.router.capabilities();
        Self {
            status: if state.shutdown.is_shutting_down() {
                ServeStatus::Draining
            } else {
                ServeStatus::Ok
            },
            uptime_secs: state.start_time.elapsed().as_secs(),
            connections: state.registry.count().await,
            max_connections: state.registry.max_connections(),
            tools: capabilities.tool_count().await,
            resources: capabilities.resource_count().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use tether_auth::JwtVerifier;
    use tether_core::{CapabilityRegistry, ResourceContents, ResourceInfo};

    use crate::config::ServerConfig;
    use crate::server::TetherServer;

    fn server() -> TetherServer {
        let caps = CapabilityRegistry::new();
        caps.register_resource(
            ResourceInfo {
                uri: "mem://a".into(),
                name: "a".into(),
                description: String::new(),
                mime_type: "text/plain".into(),
            },
            ResourceContents {
                uri: "mem://a".into(),
                mime_type: "text/plain".into(),
                text: "a".into(),
            },
        );
        let config = ServerConfig {
            max_connections: 7,
            ..ServerConfig::default()
        };
        TetherServer::new(config, Arc::new(caps), Arc::new(JwtVerifier::new(b"health", 0)))
    }

    #[tokio::test]
    async fn reports_capacity_and_capabilities() {
        let report = HealthReport::collect(&server().app_state()).await;
        assert_eq!(report.status, ServeStatus::Ok);
        assert_eq!(report.connections, 0);
        assert_eq!(report.max_connections, 7);
        assert_eq!(report.tools, 0);
        assert_eq!(report.resources, 1);
        assert!(report.uptime_secs < 2);
    }

    #[tokio::test]
    async fn draining_after_shutdown_fires() {
        let server = server();
        server.shutdown().trigger();
        let report = HealthReport::collect(&server.app_state()).await;
        assert_eq!(report.status, ServeStatus::Draining);
    }

    #[tokio::test]
    async fn serializes_flat() {
        let report = HealthReport::collect(&server().app_state()).await;
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], json!("ok"));
        assert_eq!(value["max_connections"], 7);
        assert_eq!(value.as_object().unwrap().len(), 6);
    }
}
