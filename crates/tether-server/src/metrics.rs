//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything is recorded. Fails if another
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names, recorded with the `metrics` macros across the crate.

/// Connections registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections deregistered (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Refused handshakes (counter, labels: reason).
pub const WS_AUTH_FAILURES_TOTAL: &str = "ws_auth_failures_total";
/// Keepalive probes sent (counter).
pub const WS_PINGS_SENT_TOTAL: &str = "ws_pings_sent_total";
/// Session duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Requests dispatched (counter, labels: method).
pub const MCP_REQUESTS_TOTAL: &str = "mcp_requests_total";
/// Requests answered with an error (counter, labels: method, error_type).
pub const MCP_ERRORS_TOTAL: &str = "mcp_errors_total";
/// Request duration seconds (histogram, labels: method).
pub const MCP_REQUEST_DURATION_SECONDS: &str = "mcp_request_duration_seconds";
