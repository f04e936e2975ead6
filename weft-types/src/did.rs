//! Decentralized identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A decentralized identifier (DID).
///
/// A stable public identity string derived from a public key, e.g.
/// `did:key:z6Mk...`. The relay treats DIDs as opaque routing keys;
/// derivation and verification happen in the identity layer.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Create a DID from its string form.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the string form of this DID.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the DID is empty (an envelope without a recipient).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Did {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Did {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_roundtrips_through_json() {
        let did = Did::new("did:key:z6MkAlice");
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, "\"did:key:z6MkAlice\"");
        let restored: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, did);
    }

    #[test]
    fn empty_did_is_detectable() {
        assert!(Did::default().is_empty());
        assert!(!Did::new("did:key:x").is_empty());
    }

    #[test]
    fn did_display_is_raw_string() {
        let did = Did::new("did:key:z6MkBob");
        assert_eq!(did.to_string(), "did:key:z6MkBob");
    }
}
