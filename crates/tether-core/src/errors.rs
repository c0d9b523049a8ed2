//! Error types for routing and capability handling.

/// Generic message sent back for frames that cannot be parsed.
pub const MALFORMED_MESSAGE: &str = "Invalid message format";

/// Failure raised by a capability handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// The requested resource does not exist.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The requested tool does not exist.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The handler rejected its arguments.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler itself faulted.
    #[error("{0}")]
    Failed(String),
}

/// Per-request error. Every variant is converted into an error envelope
/// addressed to the request id; none of them closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum McpError {
    /// Method name outside the known set.
    #[error("Unknown MCP method: {0}")]
    UnknownMethod(String),

    /// Known method, but its params are missing or ill-typed.
    #[error("Invalid params for {method}: {message}")]
    InvalidParams {
        /// Method being invoked.
        method: String,
        /// What is wrong.
        message: String,
    },

    /// Frame was not JSON or lacked a required field.
    #[error("{MALFORMED_MESSAGE}")]
    Malformed(String),

    /// Envelope kind that a client may not send.
    #[error("Unsupported envelope type: {0}")]
    UnsupportedKind(String),

    /// Capability handler failure.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Handler panicked.
    #[error("Handler for {0} panicked")]
    HandlerPanicked(String),

    /// Handler exceeded its deadline.
    #[error("Handler for {0} timed out")]
    HandlerTimedOut(String),
}

impl McpError {
    /// Short machine-readable label, used as a metrics dimension.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownMethod(_) => "unknown_method",
            Self::InvalidParams { .. } => "invalid_params",
            Self::Malformed(_) => "malformed",
            Self::UnsupportedKind(_) => "unsupported_kind",
            Self::Capability(_) => "handler_failure",
            Self::HandlerPanicked(_) => "handler_panic",
            Self::HandlerTimedOut(_) => "handler_timeout",
        }
    }
}
