//! Capability handler boundary.
//!
//! The router only ever talks to a [`CapabilityProvider`]. What sits behind
//! it (mock tools, a database, a filesystem) is not this crate's concern.
//! [`CapabilityRegistry`] is the stock provider: a name → handler map that
//! the embedding binary fills at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CapabilityError;

/// Tool descriptor returned by `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema of the tool's arguments.
    pub input_schema: Value,
}

/// Resource descriptor returned by `resources/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// Unique resource URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// MIME type of the content.
    pub mime_type: String,
}

/// Content returned by `resources/read`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// URI that was read.
    pub uri: String,
    /// MIME type of `text`.
    pub mime_type: String,
    /// Textual content.
    pub text: String,
}

/// One block of tool output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
}

/// Result of `tools/call`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Output blocks.
    pub content: Vec<ToolContent>,
    /// Whether the tool reports a domain-level failure.
    pub is_error: bool,
}

impl ToolCallResult {
    /// Single text block, not an error.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Single text block flagged as a tool-level error.
    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }
}

/// The set of capabilities the router dispatches to.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// All tools.
    async fn list_tools(&self) -> Vec<ToolInfo>;

    /// All resources.
    async fn list_resources(&self) -> Vec<ResourceInfo>;

    /// Read one resource. Fails with [`CapabilityError::ResourceNotFound`]
    /// when absent.
    async fn read_resource(&self, uri: &str) -> Result<ResourceContents, CapabilityError>;

    /// Invoke one tool.
    async fn call_tool(&self, name: &str, arguments: Value)
    -> Result<ToolCallResult, CapabilityError>;

    /// Number of tools, reported in the welcome envelope.
    async fn tool_count(&self) -> usize {
        self.list_tools().await.len()
    }

    /// Number of resources, reported in the welcome envelope.
    async fn resource_count(&self) -> usize {
        self.list_resources().await.len()
    }
}

/// Implementation of a single tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool.
    async fn call(&self, arguments: Value) -> Result<ToolCallResult, CapabilityError>;
}

/// Producer of a single resource's content.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Produce the content for `uri`.
    async fn read(&self, uri: &str) -> Result<ResourceContents, CapabilityError>;
}

/// Static text served as a resource.
#[async_trait]
impl ResourceHandler for ResourceContents {
    async fn read(&self, _uri: &str) -> Result<ResourceContents, CapabilityError> {
        Ok(self.clone())
    }
}

type ToolEntry = (ToolInfo, Arc<dyn ToolHandler>);
type ResourceEntry = (ResourceInfo, Arc<dyn ResourceHandler>);

/// In-memory capability registry.
///
/// Registration goes through a write lock; dispatch clones the handler out
/// of a read lock and awaits it unlocked, so slow handlers never block
/// registration or each other.
#[derive(Default)]
pub struct CapabilityRegistry {
    tools: RwLock<BTreeMap<String, ToolEntry>>,
    resources: RwLock<BTreeMap<String, ResourceEntry>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a tool.
    pub fn register_tool(&self, info: ToolInfo, handler: impl ToolHandler + 'static) {
        let _ = self
            .tools
            .write()
            .insert(info.name.clone(), (info, Arc::new(handler)));
    }

    /// Register (or replace) a resource.
    pub fn register_resource(&self, info: ResourceInfo, handler: impl ResourceHandler + 'static) {
        let _ = self
            .resources
            .write()
            .insert(info.uri.clone(), (info, Arc::new(handler)));
    }

    /// Remove a tool. Returns `true` if it was registered.
    pub fn unregister_tool(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    /// Remove a resource. Returns `true` if it was registered.
    pub fn unregister_resource(&self, uri: &str) -> bool {
        self.resources.write().remove(uri).is_some()
    }
}

#[async_trait]
impl CapabilityProvider for CapabilityRegistry {
    async fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools.read().values().map(|(info, _)| info.clone()).collect()
    }

    async fn list_resources(&self) -> Vec<ResourceInfo> {
        self.resources
            .read()
            .values()
            .map(|(info, _)| info.clone())
            .collect()
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContents, CapabilityError> {
        let handler = self
            .resources
            .read()
            .get(uri)
            .map(|(_, h)| Arc::clone(h))
            .ok_or_else(|| CapabilityError::ResourceNotFound(uri.to_owned()))?;
        handler.read(uri).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, CapabilityError> {
        let handler = self
            .tools
            .read()
            .get(name)
            .map(|(_, h)| Arc::clone(h))
            .ok_or_else(|| CapabilityError::ToolNotFound(name.to_owned()))?;
        handler.call(arguments).await
    }

    async fn tool_count(&self) -> usize {
        self.tools.read().len()
    }

    async fn resource_count(&self) -> usize {
        self.resources.read().len()
    }
}
