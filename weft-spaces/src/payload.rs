//! Envelope payloads for space replication, plus change-buffer framing.
//!
//! These structures travel inside [`MessageEnvelope::payload`] and are opaque
//! to the relay.
//!
//! [`MessageEnvelope::payload`]: weft_types::MessageEnvelope

use crate::capabilities::{EncryptedChange, Generation, Sealed};
use crate::error::SpaceError;
use crate::space::{SpaceId, SpaceInfo};
use serde::{Deserialize, Serialize};

/// Serde helpers encoding `Vec<u8>` as base64 strings in JSON.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Payload of a `content` envelope: one encrypted buffer holding one or more
/// concatenated binary diffs, with the length list needed to split them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    /// The space these changes belong to.
    pub space_id: SpaceId,
    /// Byte length of each concatenated diff, in order.
    pub change_lengths: Vec<u32>,
    /// The encrypted concatenated buffer.
    pub change: EncryptedChange,
}

/// Payload of a `space-invite` envelope: membership metadata, the wrapped
/// group key, and an encrypted full-document snapshot, all at one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePayload {
    /// The space being joined, including its member list.
    pub space: SpaceInfo,
    /// Generation of the wrapped key and the snapshot.
    pub generation: Generation,
    /// The group key, wrapped for the invitee.
    pub wrapped_key: Sealed,
    /// The full document snapshot, encrypted under the same generation.
    pub snapshot: EncryptedChange,
}

/// Payload of a `group-key-rotation` envelope: the next generation's key,
/// wrapped for one remaining member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationPayload {
    /// The rekeyed space.
    pub space_id: SpaceId,
    /// The new generation.
    pub generation: Generation,
    /// The new group key, wrapped for the recipient.
    pub wrapped_key: Sealed,
}

/// Concatenate diffs into one buffer, retaining each diff's byte length.
pub fn pack_changes(changes: &[Vec<u8>]) -> (Vec<u8>, Vec<u32>) {
    let total = changes.iter().map(Vec::len).sum();
    let mut buffer = Vec::with_capacity(total);
    let mut lengths = Vec::with_capacity(changes.len());
    for change in changes {
        lengths.push(change.len() as u32);
        buffer.extend_from_slice(change);
    }
    (buffer, lengths)
}

/// Split a decrypted buffer back into individual diffs using the carried
/// length list.
pub fn split_changes(buffer: &[u8], lengths: &[u32]) -> Result<Vec<Vec<u8>>, SpaceError> {
    let mut changes = Vec::with_capacity(lengths.len());
    let mut offset = 0usize;
    for &len in lengths {
        let end = offset
            .checked_add(len as usize)
            .filter(|&end| end <= buffer.len())
            .ok_or_else(|| {
                SpaceError::MalformedPayload("change lengths exceed buffer".to_string())
            })?;
        changes.push(buffer[offset..end].to_vec());
        offset = end;
    }
    if offset != buffer.len() {
        return Err(SpaceError::MalformedPayload(format!(
            "{} trailing bytes after {} changes",
            buffer.len() - offset,
            lengths.len()
        )));
    }
    Ok(changes)
}
