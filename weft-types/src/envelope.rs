//! Envelope - the wire format wrapper for all peer-to-peer messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Did, WireError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message type discriminator for envelope routing.
///
/// The set is closed for senders, but receivers must tolerate tags they do
/// not know: those deserialize to [`MessageKind::Unknown`] and dispatchers
/// drop them as a no-op rather than erroring, so new types can be added
/// without breaking older peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Identity verification exchange
    Verification,
    /// Signed attestation about another peer
    Attestation,
    /// Request to establish contact
    ContactRequest,
    /// Wrapped per-item key material
    ItemKey,
    /// Invitation into a shared space
    SpaceInvite,
    /// Group key rotation after a membership change
    GroupKeyRotation,
    /// Profile metadata update
    ProfileUpdate,
    /// Application-level acknowledgment
    Ack,
    /// Encrypted CRDT change payload for a space
    Content,
    /// Any tag this peer does not recognize
    #[serde(other)]
    Unknown,
}

/// Encoding of the envelope payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// Structured JSON payload
    Json,
    /// CBOR bytes, base64 in transit
    Cbor,
    /// Raw bytes, base64 in transit
    Base64,
}

/// The envelope wraps all peer messages with routing metadata.
///
/// This is the outer layer the relay sees. The relay routes purely on
/// `to_did` / `from_did` / `id` and never parses `payload`; the signature
/// is produced and verified by layers above the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Unique message id (UUID v4)
    pub id: String,
    /// Message type discriminator
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Sender DID
    pub from_did: Did,
    /// Recipient DID
    pub to_did: Did,
    /// Creation timestamp (ISO-8601)
    pub created_at: DateTime<Utc>,
    /// Payload encoding tag
    pub encoding: PayloadEncoding,
    /// The encoded payload, opaque to the relay
    pub payload: serde_json::Value,
    /// Signature over the canonical fields (base64)
    pub signature: String,
    /// Optional reference to an external resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl MessageEnvelope {
    /// Create a new unsigned envelope with a fresh id and timestamp.
    pub fn new(kind: MessageKind, from_did: Did, to_did: Did, payload: serde_json::Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            from_did,
            to_did,
            created_at: Utc::now(),
            encoding: PayloadEncoding::Json,
            payload,
            signature: String::new(),
            resource: None,
        }
    }

    /// Attach a signature (base64) produced over [`canonical_bytes`](Self::canonical_bytes).
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Attach an external resource reference.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// The canonical byte representation the signature covers.
    ///
    /// A JSON array of the routing and payload fields in fixed order, which
    /// keeps the encoding deterministic without a bespoke canonicalization
    /// scheme.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, WireError> {
        let fields = (
            self.version,
            &self.id,
            &self.kind,
            self.from_did.as_str(),
            self.to_did.as_str(),
            self.created_at.to_rfc3339(),
            &self.payload,
        );
        Ok(serde_json::to_vec(&fields)?)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_envelope() -> MessageEnvelope {
        MessageEnvelope::new(
            MessageKind::Content,
            Did::new("did:key:alice"),
            Did::new("did:key:bob"),
            serde_json::json!({"spaceId": "s-1"}),
        )
    }

    #[test]
    fn envelope_json_roundtrip() {
        let envelope = test_envelope().with_signature("c2ln");
        let json = envelope.to_json().unwrap();
        let restored = MessageEnvelope::from_json(&json).unwrap();
        assert_eq!(restored, envelope);
    }

    #[test]
    fn envelope_uses_wire_field_names() {
        let json = test_envelope().to_json().unwrap();
        assert!(json.contains("\"fromDid\":\"did:key:alice\""));
        assert!(json.contains("\"toDid\":\"did:key:bob\""));
        assert!(json.contains("\"type\":\"content\""));
        assert!(json.contains("\"createdAt\""));
        // resource is omitted when absent
        assert!(!json.contains("\"resource\""));
    }

    #[test]
    fn kind_tags_match_protocol() {
        let cases = [
            (MessageKind::Verification, "verification"),
            (MessageKind::Attestation, "attestation"),
            (MessageKind::ContactRequest, "contact-request"),
            (MessageKind::ItemKey, "item-key"),
            (MessageKind::SpaceInvite, "space-invite"),
            (MessageKind::GroupKeyRotation, "group-key-rotation"),
            (MessageKind::ProfileUpdate, "profile-update"),
            (MessageKind::Ack, "ack"),
            (MessageKind::Content, "content"),
        ];
        for (kind, tag) in cases {
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{tag}\""));
        }
    }

    #[test]
    fn unknown_kind_tag_is_tolerated() {
        let kind: MessageKind = serde_json::from_str("\"hologram-transfer\"").unwrap();
        assert_eq!(kind, MessageKind::Unknown);

        let mut json: serde_json::Value =
            serde_json::from_str(&test_envelope().to_json().unwrap()).unwrap();
        json["type"] = "hologram-transfer".into();
        let envelope = MessageEnvelope::from_json(&json.to_string()).unwrap();
        assert_eq!(envelope.kind, MessageKind::Unknown);
    }

    #[test]
    fn new_envelope_has_fresh_id_and_version() {
        let a = test_envelope();
        let b = test_envelope();
        assert_eq!(a.version, PROTOCOL_VERSION);
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn canonical_bytes_are_deterministic() {
        let envelope = test_envelope();
        assert_eq!(
            envelope.canonical_bytes().unwrap(),
            envelope.canonical_bytes().unwrap()
        );
        // Signature is not part of the canonical form
        let signed = envelope.clone().with_signature("c2ln");
        assert_eq!(
            envelope.canonical_bytes().unwrap(),
            signed.canonical_bytes().unwrap()
        );
    }

    #[test]
    fn canonical_bytes_change_with_payload() {
        let a = test_envelope();
        let mut b = a.clone();
        b.payload = serde_json::json!({"spaceId": "s-2"});
        assert_ne!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }
}
