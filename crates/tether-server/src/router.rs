//! Request routing and isolated handler dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde_json::{Value, json};
use tether_core::{
    CapabilityError, CapabilityProvider, Envelope, EnvelopeKind, Identity, McpError, McpMethod, WELCOME_ID,
};
use tracing::{debug, instrument, warn};

use crate::metrics::{MCP_ERRORS_TOTAL, MCP_REQUESTS_TOTAL, MCP_REQUEST_DURATION_SECONDS};

/// Greeting carried in the welcome envelope.
pub const WELCOME_MESSAGE: &str = "Connected to MCP server";

/// Requests slower than this are logged at `warn`.
const SLOW_REQUEST: Duration = Duration::from_secs(5);

/// What the session should do with one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A request to dispatch.
    Request(Envelope),
    /// A keepalive answer. Advisory only.
    Pong,
    /// Answer immediately with this error envelope.
    Reject(Envelope),
}

/// Maps request envelopes onto the capability provider.
pub struct McpRouter {
    capabilities: Arc<dyn CapabilityProvider>,
    handler_timeout: Duration,
}

impl McpRouter {
    /// Create a router over `capabilities`, aborting handlers that run longer
    /// than `handler_timeout`.
    pub fn new(capabilities: Arc<dyn CapabilityProvider>, handler_timeout: Duration) -> Self {
        Self {
            capabilities,
            handler_timeout,
        }
    }

    /// The capability provider behind this router.
    pub fn capabilities(&self) -> &Arc<dyn CapabilityProvider> {
        &self.capabilities
    }

    /// Build the welcome envelope for a freshly authenticated identity.
    pub async fn welcome(&self, identity: &Identity) -> Envelope {
        let tools = self.capabilities.tool_count().await;
        let resources = self.capabilities.resource_count().await;
        Envelope::response(
            WELCOME_ID,
            json!({
                "message": WELCOME_MESSAGE,
                "user": { "id": identity.id, "role": identity.role },
                "capabilities": { "tools": tools, "resources": resources },
            }),
        )
    }

    /// Classify one inbound text frame.
    pub fn route_inbound(text: &str) -> Inbound {
        let envelope = match Envelope::parse(text) {
            Ok(e) => e,
            Err((id, err)) => {
                warn!(id, error = ?err, "malformed envelope");
                counter!(MCP_ERRORS_TOTAL, "method" => "none", "error_type" => err.label())
                    .increment(1);
                return Inbound::Reject(Envelope::error(id, err.to_string()));
            }
        };
        match envelope.kind {
            EnvelopeKind::McpRequest => Inbound::Request(envelope),
            EnvelopeKind::Pong => Inbound::Pong,
            other => {
                let err = McpError::UnsupportedKind(other.as_str().to_owned());
                debug!(id = %envelope.id, kind = other.as_str(), "unsupported envelope from client");
                Inbound::Reject(Envelope::error(envelope.id, err.to_string()))
            }
        }
    }

    /// Dispatch one request envelope and produce its terminal envelope.
    ///
    /// The handler runs on its own task: a panic or an overrun becomes an
    /// error envelope for this id and never affects other requests. The
    /// response always carries the inbound id.
    #[instrument(skip_all, fields(id = %request.id, method = request.method.as_deref().unwrap_or("")))]
    pub async fn dispatch(&self, request: Envelope) -> Envelope {
        let id = request.id;
        let Some(method_name) = request.method else {
            let err = McpError::Malformed("mcp_request without method".into());
            warn!(id = %id, "request has no method");
            counter!(MCP_ERRORS_TOTAL, "method" => "none", "error_type" => err.label()).increment(1);
            return Envelope::error(id, err.to_string());
        };
        counter!(MCP_REQUESTS_TOTAL, "method" => method_name.clone()).increment(1);

        let start = Instant::now();
        let outcome = match McpMethod::parse(&method_name, request.params.as_ref()) {
            Ok(method) => self.invoke_isolated(method).await,
            Err(e) => Err(e),
        };
        let duration = start.elapsed();
        histogram!(MCP_REQUEST_DURATION_SECONDS, "method" => method_name.clone())
            .record(duration.as_secs_f64());
        if duration >= SLOW_REQUEST {
            warn!(
                method = %method_name,
                duration_secs = duration.as_secs_f64(),
                "slow MCP request"
            );
        }

        match outcome {
            Ok(result) => {
                debug!(method = %method_name, "request completed");
                Envelope::response(id, result)
            }
            Err(err) => {
                counter!(MCP_ERRORS_TOTAL, "method" => method_name.clone(), "error_type" => err.label())
                    .increment(1);
                debug!(method = %method_name, error = %err, "request failed");
                Envelope::error(id, err.to_string())
            }
        }
    }

    async fn invoke_isolated(&self, method: McpMethod) -> Result<Value, McpError> {
        let name = method.name();
        let capabilities = Arc::clone(&self.capabilities);
        let mut task = tokio::spawn(async move { invoke(capabilities.as_ref(), method).await });

        match tokio::time::timeout(self.handler_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                warn!(method = name, error = %join_err, "handler task failed");
                Err(McpError::HandlerPanicked(name.to_owned()))
            }
            Err(_elapsed) => {
                task.abort();
                tracing::error!(method = name, "handler timed out after {:?}", self.handler_timeout);
                Err(McpError::HandlerTimedOut(name.to_owned()))
            }
        }
    }
}

async fn invoke(capabilities: &dyn CapabilityProvider, method: McpMethod) -> Result<Value, McpError> {
    let value = match method {
        McpMethod::ListTools => json!({ "tools": capabilities.list_tools().await }),
        McpMethod::ListResources => json!({ "resources": capabilities.list_resources().await }),
        McpMethod::ReadResource { uri } => {
            let contents = capabilities.read_resource(&uri).await?;
            json!({ "contents": [contents] })
        }
        McpMethod::CallTool { name, arguments } => {
            let result = capabilities.call_tool(&name, arguments).await?;
            serde_json::to_value(result)
                .map_err(|e| McpError::from(CapabilityError::Failed(e.to_string())))?
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tether_core::errors::MALFORMED_MESSAGE;
    use tether_core::{
        CapabilityRegistry, ResourceContents, ResourceInfo, ToolCallResult,
        ToolHandler, ToolInfo,
    };

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: Value) -> Result<ToolCallResult, CapabilityError> {
            let text = arguments
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| CapabilityError::InvalidArguments("missing 'text'".into()))?;
            Ok(ToolCallResult::text(text))
        }
    }

    struct Sleepy(Duration);

    #[async_trait]
    impl ToolHandler for Sleepy {
        async fn call(&self, _arguments: Value) -> Result<ToolCallResult, CapabilityError> {
            tokio::time::sleep(self.0).await;
            Ok(ToolCallResult::text("done"))
        }
    }

    struct Broken;

    #[async_trait]
    impl ToolHandler for Broken {
        async fn call(&self, _arguments: Value) -> Result<ToolCallResult, CapabilityError> {
            Err(CapabilityError::Failed("disk on fire".into()))
        }
    }

    struct Panicky;

    #[async_trait]
    impl ToolHandler for Panicky {
        async fn call(&self, _arguments: Value) -> Result<ToolCallResult, CapabilityError> {
            panic!("handler exploded");
        }
    }

    fn tool(name: &str) -> ToolInfo {
        ToolInfo {
            name: name.into(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        }
    }

    fn make_router(timeout: Duration) -> McpRouter {
        let reg = CapabilityRegistry::new();
        reg.register_tool(tool("echo"), Echo);
        reg.register_tool(tool("slow"), Sleepy(Duration::from_secs(10)));
        reg.register_tool(tool("broken"), Broken);
        reg.register_tool(tool("panicky"), Panicky);
        reg.register_resource(
            ResourceInfo {
                uri: "mem://notes".into(),
                name: "notes".into(),
                description: String::new(),
                mime_type: "text/plain".into(),
            },
            ResourceContents {
                uri: "mem://notes".into(),
                mime_type: "text/plain".into(),
                text: "remember the milk".into(),
            },
        );
        McpRouter::new(Arc::new(reg), timeout)
    }

    fn req(id: &str, method: &str, params: Option<Value>) -> Envelope {
        Envelope::request(id, method, params)
    }

    #[tokio::test]
    async fn welcome_reports_identity_and_counts() {
        let router = make_router(Duration::from_secs(1));
        let env = router.welcome(&Identity::new("u7", "admin")).await;
        assert_eq!(env.id, "welcome");
        assert_eq!(env.kind, EnvelopeKind::McpResponse);
        let result = env.result.unwrap();
        assert_eq!(result["message"], WELCOME_MESSAGE);
        assert_eq!(result["user"]["id"], "u7");
        assert_eq!(result["user"]["role"], "admin");
        assert_eq!(result["capabilities"]["tools"], 4);
        assert_eq!(result["capabilities"]["resources"], 1);
    }

    #[tokio::test]
    async fn list_tools_shape() {
        let router = make_router(Duration::from_secs(1));
        let env = router.dispatch(req("r1", "tools/list", None)).await;
        assert_eq!(env.id, "r1");
        assert_eq!(env.kind, EnvelopeKind::McpResponse);
        let tools = env.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 4);
    }

    #[tokio::test]
    async fn list_and_read_resource() {
        let router = make_router(Duration::from_secs(1));
        let env = router.dispatch(req("r1", "resources/list", None)).await;
        assert_eq!(env.result.unwrap()["resources"][0]["mimeType"], "text/plain");

        let env = router
            .dispatch(req("r2", "resources/read", Some(json!({"uri": "mem://notes"}))))
            .await;
        let result = env.result.unwrap();
        assert_eq!(result["contents"][0]["uri"], "mem://notes");
        assert_eq!(result["contents"][0]["text"], "remember the milk");
    }

    #[tokio::test]
    async fn call_tool_shape() {
        let router = make_router(Duration::from_secs(1));
        let env = router
            .dispatch(req(
                "r1",
                "tools/call",
                Some(json!({"name": "echo", "arguments": {"text": "hi"}})),
            ))
            .await;
        let result = env.result.unwrap();
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "hi");
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn unknown_method() {
        let router = make_router(Duration::from_secs(1));
        let env = router.dispatch(req("r9", "bogus/op", None)).await;
        assert_eq!(env.id, "r9");
        assert_eq!(env.kind, EnvelopeKind::Error);
        assert_eq!(env.error.as_deref(), Some("Unknown MCP method: bogus/op"));
    }

    #[tokio::test]
    async fn missing_params() {
        let router = make_router(Duration::from_secs(1));
        let env = router.dispatch(req("r1", "resources/read", None)).await;
        assert_eq!(
            env.error.as_deref(),
            Some("Invalid params for resources/read: missing 'uri'")
        );
        let env = router
            .dispatch(req("r2", "tools/call", Some(json!({"arguments": {}}))))
            .await;
        assert_eq!(
            env.error.as_deref(),
            Some("Invalid params for tools/call: missing 'name'")
        );
    }

    #[tokio::test]
    async fn request_without_method_is_malformed() {
        let router = make_router(Duration::from_secs(1));
        let mut env = req("r1", "x", None);
        env.method = None;
        let out = router.dispatch(env).await;
        assert_eq!(out.id, "r1");
        assert_eq!(out.kind, EnvelopeKind::Error);
        assert_eq!(out.error.as_deref(), Some(MALFORMED_MESSAGE));
    }

    #[tokio::test]
    async fn resource_not_found() {
        let router = make_router(Duration::from_secs(1));
        let env = router
            .dispatch(req("r1", "resources/read", Some(json!({"uri": "mem://nope"}))))
            .await;
        assert_eq!(env.error.as_deref(), Some("Resource not found: mem://nope"));
    }

    #[tokio::test]
    async fn handler_failure_carries_message() {
        let router = make_router(Duration::from_secs(1));
        let env = router
            .dispatch(req("r1", "tools/call", Some(json!({"name": "broken"}))))
            .await;
        assert_eq!(env.kind, EnvelopeKind::Error);
        assert_eq!(env.error.as_deref(), Some("disk on fire"));
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let router = make_router(Duration::from_secs(1));
        let env = router
            .dispatch(req("r1", "tools/call", Some(json!({"name": "panicky"}))))
            .await;
        assert_eq!(env.id, "r1");
        assert_eq!(env.error.as_deref(), Some("Handler for tools/call panicked"));

        // router still serves afterwards
        let env = router.dispatch(req("r2", "tools/list", None)).await;
        assert_eq!(env.kind, EnvelopeKind::McpResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_timeout() {
        let router = make_router(Duration::from_secs(2));
        let env = router
            .dispatch(req("r1", "tools/call", Some(json!({"name": "slow"}))))
            .await;
        assert_eq!(env.error.as_deref(), Some("Handler for tools/call timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_keep_their_ids() {
        let router = Arc::new(make_router(Duration::from_secs(60)));
        let slow = {
            let r = router.clone();
            tokio::spawn(async move {
                r.dispatch(req("a", "tools/call", Some(json!({"name": "slow"}))))
                    .await
            })
        };
        let fast = router.dispatch(req("b", "tools/list", None)).await;
        assert_eq!(fast.id, "b");
        assert!(!slow.is_finished());
        let slow = slow.await.unwrap();
        assert_eq!(slow.id, "a");
        assert_eq!(slow.result.unwrap()["content"][0]["text"], "done");
    }

    #[test]
    fn route_inbound_request_and_pong() {
        let inbound = McpRouter::route_inbound(r#"{"id":"r1","type":"mcp_request","method":"tools/list"}"#);
        assert_matches!(inbound, Inbound::Request(e) if e.id == "r1");
        let inbound = McpRouter::route_inbound(r#"{"id":"ping","type":"pong"}"#);
        assert_eq!(inbound, Inbound::Pong);
    }

    #[test]
    fn route_inbound_malformed() {
        let Inbound::Reject(env) = McpRouter::route_inbound("not json") else {
            panic!("expected rejection");
        };
        assert_eq!(env.id, "unknown");
        assert_eq!(env.error.as_deref(), Some("Invalid message format"));

        let Inbound::Reject(env) = McpRouter::route_inbound(r#"{"id":"r5","type":"bogus"}"#) else {
            panic!("expected rejection");
        };
        assert_eq!(env.id, "r5");
        assert_eq!(env.error.as_deref(), Some("Invalid message format"));
    }

    #[test]
    fn route_inbound_unsupported_kind() {
        let Inbound::Reject(env) = McpRouter::route_inbound(r#"{"id":"x","type":"mcp_response","result":{}}"#) else {
            panic!("expected rejection");
        };
        assert_eq!(env.id, "x");
        assert_eq!(env.error.as_deref(), Some("Unsupported envelope type: mcp_response"));
    }
}
