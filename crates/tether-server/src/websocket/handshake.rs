//! Auth gate: credential extraction, verification, and rejection.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use metrics::counter;
use tether_auth::{AuthError, CredentialVerifier};
use tether_core::{Envelope, Identity};
use tracing::{debug, warn};

use crate::metrics::WS_AUTH_FAILURES_TOTAL;

/// Query parameter and cookie name carrying the credential.
pub const TOKEN_PARAM: &str = "token";
/// Close code for handshake failures (policy violation).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code when the server is at its connection cap.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Id of the error envelope sent before a handshake close.
pub const HANDSHAKE_ERROR_ID: &str = "auth";

/// Why a handshake was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// No credential in query, header, or cookie.
    #[error("Authentication required")]
    Missing,
    /// Credential present but rejected by the verifier.
    #[error("Authentication failed")]
    Failed(#[source] AuthError),
    /// Registry is full.
    #[error("Server at connection capacity")]
    AtCapacity,
}

impl HandshakeError {
    /// WebSocket close code sent after the error envelope.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Missing | Self::Failed(_) => CLOSE_POLICY_VIOLATION,
            Self::AtCapacity => CLOSE_TRY_AGAIN_LATER,
        }
    }

    /// Metrics label.
    fn label(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Failed(_) => "failed",
            Self::AtCapacity => "capacity",
        }
    }
}

/// Pull the credential out of the upgrade request.
///
/// Priority: `?token=` query parameter, then `Authorization: Bearer`, then
/// the `token` cookie. Empty values count as absent.
pub fn extract_credential(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_owned())
    };

    if let Some(token) = query_token.and_then(non_empty) {
        return Some(token);
    }

    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, rest) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then_some(rest)
        })
        .and_then(non_empty);
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_PARAM)
        .and_then(|(_, value)| non_empty(value))
}

/// Verify an extracted credential.
pub fn authenticate(
    credential: Option<&str>,
    verifier: &dyn CredentialVerifier,
) -> Result<Identity, HandshakeError> {
    let token = credential.ok_or(HandshakeError::Missing)?;
    verifier.verify(token).map_err(HandshakeError::Failed)
}

/// Send one error envelope followed by a close frame.
///
/// No registry entry exists for a rejected socket.
pub async fn reject(mut socket: WebSocket, err: &HandshakeError) {
    counter!(WS_AUTH_FAILURES_TOTAL, "reason" => err.label()).increment(1);
    match err {
        HandshakeError::Failed(cause) => warn!(error = %cause, "handshake rejected"),
        _ => debug!(reason = %err, "handshake rejected"),
    }

    let envelope = Envelope::error(HANDSHAKE_ERROR_ID, err.to_string());
    if let Ok(text) = envelope.to_text() {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let frame = CloseFrame {
        code: err.close_code(),
        reason: Utf8Bytes::from(err.to_string()),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
