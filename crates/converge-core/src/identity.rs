//! Identity and message-hash newtypes.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// The identity a config is scoped to: the local account's public key
/// for self-scoped categories, or a group's public key for group state.
///
/// Stored as the hex encoding assigned by the key layer. An `Identity`
/// may be constructed from any string; callers that require a non-empty
/// identity use [`Identity::require_non_empty`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identity is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fail with [`CoreError::EmptyIdentity`] if the identity is empty.
    pub fn require_non_empty(&self) -> Result<&Self, CoreError> {
        if self.is_empty() {
            Err(CoreError::EmptyIdentity)
        } else {
            Ok(self)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncate long hex identities for log readability.
        if self.0.len() > 16 {
            write!(f, "{}…", &self.0[..16])
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The relay-assigned hash identifying a stored wire message.
///
/// Used to detect already-applied deltas and to expire messages that a
/// confirmed push has made obsolete.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageHash(String);

impl MessageHash {
    /// Wrap a relay hash string.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
