//! Space identity and membership types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use weft_types::Did;

/// A unique identifier for a space (UUID v4 string).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(String);

impl SpaceId {
    /// Generate a fresh space id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create a SpaceId from its string form.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the string form of this id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpaceId({})", self.0)
    }
}

/// Whether a space belongs to one peer or is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceType {
    /// A single peer's own space (multi-device sync only).
    Personal,
    /// A multi-party space with a member list.
    Shared,
}

/// Public description of a space: id, type, ordered member list, creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceInfo {
    /// The space id.
    pub id: SpaceId,
    /// Space type.
    #[serde(rename = "type")]
    pub space_type: SpaceType,
    /// Member DIDs, in join order.
    pub members: Vec<Did>,
    /// When the space was created.
    pub created_at: DateTime<Utc>,
}

/// What happened to a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberAction {
    /// The member was invited into the space.
    Added,
    /// The member was removed and the group key rotated.
    Removed,
}

/// Notification emitted to local listeners on membership change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberChange {
    /// The affected space.
    pub space_id: SpaceId,
    /// The affected member.
    pub did: Did,
    /// What happened.
    pub action: MemberAction,
}
