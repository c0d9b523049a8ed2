//! The finite set of request methods.

use serde_json::{Map, Value};

use crate::errors::McpError;

/// A request method with its decoded params.
#[derive(Clone, Debug, PartialEq)]
pub enum McpMethod {
    /// `tools/list`
    ListTools,
    /// `resources/list`
    ListResources,
    /// `resources/read` with `{uri}`
    ReadResource {
        /// Resource URI.
        uri: String,
    },
    /// `tools/call` with `{name, arguments}`
    CallTool {
        /// Tool name.
        name: String,
        /// Tool arguments (an empty object when omitted).
        arguments: Value,
    },
}

impl McpMethod {
    /// Wire name of `tools/list`.
    pub const TOOLS_LIST: &'static str = "tools/list";
    /// Wire name of `resources/list`.
    pub const RESOURCES_LIST: &'static str = "resources/list";
    /// Wire name of `resources/read`.
    pub const RESOURCES_READ: &'static str = "resources/read";
    /// Wire name of `tools/call`.
    pub const TOOLS_CALL: &'static str = "tools/call";

    /// Decode a method name and its params.
    pub fn parse(method: &str, params: Option<&Value>) -> Result<Self, McpError> {
        match method {
            Self::TOOLS_LIST => Ok(Self::ListTools),
            Self::RESOURCES_LIST => Ok(Self::ListResources),
            Self::RESOURCES_READ => {
                let uri = required_str(method, params, "uri")?;
                Ok(Self::ReadResource { uri })
            }
            Self::TOOLS_CALL => {
                let name = required_str(method, params, "name")?;
                let arguments = params
                    .and_then(|p| p.get("arguments"))
                    .filter(|a| !a.is_null())
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                Ok(Self::CallTool { name, arguments })
            }
            other => Err(McpError::UnknownMethod(other.to_owned())),
        }
    }

    /// Wire name of this method.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListTools => Self::TOOLS_LIST,
            Self::ListResources => Self::RESOURCES_LIST,
            Self::ReadResource { .. } => Self::RESOURCES_READ,
            Self::CallTool { .. } => Self::TOOLS_CALL,
        }
    }
}

fn required_str(method: &str, params: Option<&Value>, key: &str) -> Result<String, McpError> {
    params
        .and_then(|p| p.get(key))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| McpError::InvalidParams {
            method: method.to_owned(),
            message: format!("missing '{key}'"),
        })
}
