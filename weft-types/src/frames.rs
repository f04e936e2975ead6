//! The JSON wire protocol between client and relay.
//!
//! One JSON object per WebSocket text frame, discriminated by a `type` tag.

use serde::{Deserialize, Serialize};

use crate::{DeliveryReceipt, Did, MessageEnvelope, WireError};

/// Error codes carried in [`ServerFrame::Error`].
pub mod error_code {
    /// Frame was not valid JSON or not a known frame shape.
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    /// `send` or similar before `register`.
    pub const NOT_REGISTERED: &str = "NOT_REGISTERED";
    /// Envelope lacks a recipient DID.
    pub const MISSING_RECIPIENT: &str = "MISSING_RECIPIENT";
    /// Mailbox storage failure; the envelope was not accepted.
    pub const INTERNAL: &str = "INTERNAL";
    /// Sender exceeded its message quota.
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
}

/// Frames a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Bind this connection to a DID and drain the offline mailbox.
    Register {
        /// The DID to register under.
        did: Did,
    },
    /// Route or queue an envelope for its recipient.
    Send {
        /// The envelope to deliver.
        envelope: MessageEnvelope,
    },
    /// Confirm application-level processing of an envelope.
    Ack {
        /// Id of the processed envelope.
        #[serde(rename = "messageId")]
        message_id: String,
    },
    /// Liveness probe; the relay answers with `pong`.
    Ping,
}

/// Frames the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Registration succeeded.
    Registered {
        /// The DID this connection is now bound to.
        did: Did,
    },
    /// An inbound envelope for the registered DID.
    Message {
        /// The delivered envelope.
        envelope: MessageEnvelope,
    },
    /// Delivery receipt for a previously sent envelope.
    Receipt {
        /// The receipt.
        receipt: DeliveryReceipt,
    },
    /// Protocol or storage error scoped to this connection.
    Error {
        /// Machine-readable code, see [`error_code`].
        code: String,
        /// Human-readable description.
        message: String,
    },
    /// Answer to a `ping`.
    Pong,
}

impl ClientFrame {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl ServerFrame {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convenience constructor for error frames.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
