//! HS256 JWT credentials.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tether_core::Identity;
use tracing::debug;

use crate::CredentialVerifier;
use crate::errors::AuthError;

/// Role assumed when a token carries no `role` claim.
pub const DEFAULT_ROLE: &str = "user";

/// Claims carried by a tether token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity id).
    pub sub: String,
    /// Granted role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

impl Claims {
    /// Claims for `identity` valid for `ttl` from now.
    pub fn for_identity(identity: &Identity, ttl: chrono::Duration) -> Self {
        let now = chrono::Utc::now();
        Self {
            sub: identity.id.clone(),
            role: Some(identity.role.clone()),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }
}

/// Verifies (and, for tooling and tests, issues) HS256 tokens.
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for `secret` tolerating `leeway_secs` of clock skew.
    pub fn new(secret: &[u8], leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign `claims` into a token.
    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Sign a token for `identity` valid for `ttl`.
    pub fn issue_for(&self, identity: &Identity, ttl: chrono::Duration) -> Result<String, AuthError> {
        self.issue(&Claims::for_identity(identity, ttl))
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })?;
        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::Invalid("empty subject".into()));
        }
        debug!(sub = %claims.sub, "credential verified");
        Ok(Identity {
            id: claims.sub,
            role: claims.role.unwrap_or_else(|| DEFAULT_ROLE.to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &[u8] = b"test-secret";

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(SECRET, 0)
    }

    #[test]
    fn issued_token_verifies() {
        let v = verifier();
        let who = Identity::new("alice", "admin");
        let token = v.issue_for(&who, chrono::Duration::minutes(5)).unwrap();
        assert_eq!(v.verify(&token).unwrap(), who);
    }

    #[test]
    fn missing_role_defaults() {
        let v = verifier();
        let now = chrono::Utc::now().timestamp();
        let token = v
            .issue(&Claims {
                sub: "bob".into(),
                role: None,
                iat: now,
                exp: now + 60,
            })
            .unwrap();
        assert_eq!(v.verify(&token).unwrap().role, DEFAULT_ROLE);
    }

    #[test]
    fn expired_token_rejected() {
        let v = verifier();
        let now = chrono::Utc::now().timestamp();
        let token = v
            .issue(&Claims {
                sub: "carol".into(),
                role: None,
                iat: now - 120,
                exp: now - 60,
            })
            .unwrap();
        assert_eq!(v.verify(&token).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = JwtVerifier::new(b"other", 0)
            .issue_for(&Identity::new("dave", "user"), chrono::Duration::minutes(5))
            .unwrap();
        assert_matches!(verifier().verify(&token), Err(AuthError::Invalid(_)));
    }

    #[test]
    fn garbage_rejected() {
        assert_matches!(verifier().verify("not.a.jwt"), Err(AuthError::Invalid(_)));
        assert_matches!(verifier().verify(""), Err(AuthError::Invalid(_)));
    }

    #[test]
    fn empty_subject_rejected() {
        let v = verifier();
        let now = chrono::Utc::now().timestamp();
        let token = v
            .issue(&Claims {
                sub: String::new(),
                role: None,
                iat: now,
                exp: now + 60,
            })
            .unwrap();
        assert_matches!(v.verify(&token), Err(AuthError::Invalid(_)));
    }
}
