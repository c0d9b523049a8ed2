//! Envelope wire format.
//!
//! Every frame on the channel is one JSON object:
//!
//! ```json
//! {"id": "req_1", "type": "mcp_request", "method": "tools/list"}
//! ```
//!
//! `id` correlates a request with its terminal envelope. Server-initiated
//! envelopes that are not correlated with anything use the sentinel ids
//! [`WELCOME_ID`] and [`PING_ID`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::McpError;

/// Sentinel id of the welcome envelope sent after a successful handshake.
pub const WELCOME_ID: &str = "welcome";
/// Sentinel id of keepalive probes.
pub const PING_ID: &str = "ping";
/// Id used for error envelopes answering frames whose id could not be read.
pub const UNKNOWN_ID: &str = "unknown";

/// Envelope discriminator, serialized as the `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Client → server request.
    McpRequest,
    /// Successful terminal envelope.
    McpResponse,
    /// Failed terminal envelope.
    Error,
    /// Server keepalive probe.
    Ping,
    /// Client answer to a probe.
    Pong,
}

impl EnvelopeKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::McpRequest => "mcp_request",
            Self::McpResponse => "mcp_response",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    /// Whether an envelope of this kind settles a request.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::McpResponse | Self::Error)
    }
}

/// One JSON message unit exchanged over the duplex channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id (or a sentinel for uncorrelated envelopes).
    pub id: String,
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Method name, on requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters, on requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Result payload, on successful responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message, on error envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    fn bare(id: impl Into<String>, kind: EnvelopeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    /// Build a request envelope.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::bare(id, EnvelopeKind::McpRequest)
        }
    }

    /// Build a successful response envelope.
    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::bare(id, EnvelopeKind::McpResponse)
        }
    }

    /// Build an error envelope.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare(id, EnvelopeKind::Error)
        }
    }

    /// Build a keepalive probe.
    pub fn ping() -> Self {
        Self::bare(PING_ID, EnvelopeKind::Ping)
    }

    /// Build the answer to a probe, echoing its id.
    pub fn pong(id: impl Into<String>) -> Self {
        Self::bare(id, EnvelopeKind::Pong)
    }

    /// Whether this envelope settles a request.
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Parse a text frame.
    ///
    /// On failure the error carries the frame's `id` when one could be
    /// salvaged, so the parse-error envelope can still be addressed.
    pub fn parse(text: &str) -> Result<Self, (String, McpError)> {
        serde_json::from_str(text).map_err(|e| {
            let id = salvage_id(text).unwrap_or_else(|| UNKNOWN_ID.to_owned());
            (id, McpError::Malformed(e.to_string()))
        })
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn salvage_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("id")?.as_str().map(str::to_owned)
}
