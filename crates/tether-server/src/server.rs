//! `TetherServer`: Axum HTTP + `WebSocket` server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tether_auth::CredentialVerifier;
use tether_core::CapabilityProvider;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::HealthReport;
use crate::registry::ConnectionRegistry;
use crate::router::McpRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handshake::{self, TOKEN_PARAM};
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Request router.
    pub router: Arc<McpRouter>,
    /// Credential verifier used by the auth gate.
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The tether server.
pub struct TetherServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<McpRouter>,
    verifier: Arc<dyn CredentialVerifier>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl TetherServer {
    /// Create a server exposing `capabilities` to clients accepted by
    /// `verifier`.
    pub fn new(
        config: ServerConfig,
        capabilities: Arc<dyn CapabilityProvider>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let router = McpRouter::new(capabilities, config.handler_timeout());
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        Self {
            shutdown: Arc::new(ShutdownCoordinator::new(registry.clone())),
            registry,
            router: Arc::new(router),
            config: Arc::new(config),
            verifier,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Handler state sharing this server's registry, router, and signals.
    pub fn app_state(&self) -> AppState {
        AppState {
            registry: self.registry.clone(),
            router: self.router.clone(),
            verifier: self.verifier.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.app_state())
    }

    /// Bind and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "tether server listening");

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "server exited with error");
            }
            info!("tether server stopped");
        });
        Ok((local, handle))
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Request router.
    pub fn mcp_router(&self) -> &Arc<McpRouter> {
        &self.router
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport::collect(&state).await)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /ws
///
/// The credential is checked before the upgrade completes; a refused client
/// still gets the upgrade so it can receive the error envelope and close
/// frame.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let credential =
        handshake::extract_credential(query.get(TOKEN_PARAM).map(String::as_str), &headers);
    let verdict = handshake::authenticate(credential.as_deref(), state.verifier.as_ref());

    let ctx = SessionContext {
        registry: state.registry.clone(),
        router: state.router.clone(),
        ping_interval: state.config.ping_interval(),
        shutdown: state.shutdown.token(),
    };

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            match verdict {
                Ok(identity) => run_ws_session(socket, identity, ctx).await,
                Err(err) => handshake::reject(socket, &err).await,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tether_auth::AuthError;
    use tether_core::{CapabilityRegistry, Identity};
    use tower::ServiceExt;

    struct AllowAll;

    impl CredentialVerifier for AllowAll {
        fn verify(&self, token: &str) -> Result<Identity, AuthError> {
            Ok(Identity::new(token, "user"))
        }
    }

    fn make_server() -> TetherServer {
        TetherServer::new(
            ServerConfig::default(),
            Arc::new(CapabilityRegistry::new()),
            Arc::new(AllowAll),
        )
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert_eq!(server.registry().count().await, 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_body(make_server().router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let (status, _) = get_body(make_server().router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_renders() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let server = make_server().with_metrics(recorder.handle());
        let (status, _) = get_body(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let (status, _) = get_body(make_server().router(), "/ws").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (status, _) = get_body(make_server().router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().trigger();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
