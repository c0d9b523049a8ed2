//! Authenticated identity and connection keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity decoded from a verified credential.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Subject id.
    pub id: String,
    /// Role granted by the credential.
    pub role: String,
}

impl Identity {
    /// Create an identity.
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }
}

/// Registry key of a live connection: the identity plus a time-ordered
/// UUID v7, unique within one process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    /// Mint a key for a freshly authenticated identity.
    #[must_use]
    pub fn new(identity: &Identity) -> Self {
        Self(format!("{}:{}", identity.id, Uuid::now_v7()))
    }

    /// Wrap an existing key string.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
