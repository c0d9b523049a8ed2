//! Auth error types.

/// Errors that can occur while verifying a credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The credential's expiry is in the past.
    #[error("credential expired")]
    Expired,

    /// Signature, format, or claims are invalid.
    #[error("invalid credential: {0}")]
    Invalid(String),

    /// Could not sign a credential.
    #[error("failed to sign credential: {0}")]
    Signing(String),
}
