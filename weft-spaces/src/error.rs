//! Error types for weft-spaces.

use crate::space::SpaceId;
use thiserror::Error;

/// Errors from the external capabilities (identity, CRDT engine, group keys,
/// change cipher).
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Encryption or decryption failed.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Key material was malformed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// The CRDT engine rejected an operation.
    #[error("document failure: {0}")]
    Document(String),
}

/// Errors from the replication adapter.
#[derive(Debug, Error)]
pub enum SpaceError {
    /// A capability call failed.
    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// The space is not known locally.
    #[error("unknown space: {0}")]
    UnknownSpace(SpaceId),

    /// No key material exists for the space.
    #[error("no key material for space {0}")]
    NoKey(SpaceId),

    /// A payload failed to (de)serialize.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A payload was structurally invalid.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The transport adapter failed.
    #[error("client error: {0}")]
    Client(#[from] weft_client::ClientError),

    /// Wire encoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] weft_types::WireError),

    /// The handle was already closed.
    #[error("space handle is closed")]
    HandleClosed,
}
