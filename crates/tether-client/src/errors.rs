//! Client error types.

use std::time::Duration;

/// Why a request, or the session carrying it, failed.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No open channel; nothing was sent or registered.
    #[error("not connected")]
    NotConnected,

    /// No terminal envelope arrived before the deadline. Never transmitted.
    #[error("request {id} timed out after {after:?}")]
    Timeout {
        /// Correlation id of the request.
        id: String,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// The server answered with an error envelope.
    #[error("{0}")]
    Remote(String),

    /// The channel failed while sending or dialing.
    #[error("transport error: {0}")]
    Transport(String),

    /// The waiter was dropped before settling.
    #[error("request abandoned before a response arrived")]
    Closed,

    /// A response arrived but its result did not have the expected shape.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// Envelope (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
