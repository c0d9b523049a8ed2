//! # tether-auth
//!
//! Credential verification for incoming tether connections.
//!
//! The server's auth gate only depends on [`CredentialVerifier`]. The
//! bundled [`JwtVerifier`] accepts HS256 tokens whose `sub` and `role`
//! claims become the connection's [`Identity`](tether_core::Identity).

#![deny(unsafe_code)]

pub mod errors;
pub mod jwt;

pub use errors::AuthError;
pub use jwt::{Claims, JwtVerifier};

use tether_core::Identity;

/// Verifies an opaque credential and decodes the identity it carries.
pub trait CredentialVerifier: Send + Sync {
    /// Verify `token`, returning the identity it grants.
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}
