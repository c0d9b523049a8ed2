//! Built-in capability set served by `tether-agent serve`.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};
use tether_core::{
    CapabilityError, CapabilityRegistry, ResourceContents, ResourceHandler, ResourceInfo,
    ToolCallResult, ToolHandler, ToolInfo,
};

/// URI of the server info resource.
pub const SERVER_INFO_URI: &str = "tether://server/info";

/// Returns its `text` argument unchanged.
struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    async fn call(&self, arguments: Value) -> Result<ToolCallResult, CapabilityError> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::InvalidArguments("'text' must be a string".into()))?;
        Ok(ToolCallResult::text(text))
    }
}

/// Current UTC time in RFC 3339.
struct GetTime;

#[async_trait]
impl ToolHandler for GetTime {
    async fn call(&self, _arguments: Value) -> Result<ToolCallResult, CapabilityError> {
        Ok(ToolCallResult::text(chrono::Utc::now().to_rfc3339()))
    }
}

/// Version and uptime, rendered on each read.
struct ServerInfo {
    started: Instant,
}

#[async_trait]
impl ResourceHandler for ServerInfo {
    async fn read(&self, uri: &str) -> Result<ResourceContents, CapabilityError> {
        let body = json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSecs": self.started.elapsed().as_secs(),
        });
        Ok(ResourceContents {
            uri: uri.to_owned(),
            mime_type: "application/json".into(),
            text: body.to_string(),
        })
    }
}

/// `echo`, `get_time`, and the server info resource.
pub fn capabilities() -> CapabilityRegistry {
    let registry = CapabilityRegistry::new();
    registry.register_tool(
        ToolInfo {
            name: "echo".into(),
            description: "Echo back the given text".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            }),
        },
        Echo,
    );
    registry.register_tool(
        ToolInfo {
            name: "get_time".into(),
            description: "Current server time (UTC, RFC 3339)".into(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        GetTime,
    );
    registry.register_resource(
        ResourceInfo {
            uri: SERVER_INFO_URI.into(),
            name: "server-info".into(),
            description: "Server name, version, and uptime".into(),
            mime_type: "application/json".into(),
        },
        ServerInfo {
            started: Instant::now(),
        },
    );
    registry
}
