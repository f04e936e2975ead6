//! Delivery receipts reported by the relay for each sent envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery state of a single envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Queued durably; recipient had no live connection.
    Accepted,
    /// Handed to at least one live connection, not yet application-acknowledged.
    Delivered,
    /// Recipient application confirmed processing.
    Acknowledged,
    /// Delivery failed (see `reason`).
    Failed,
}

/// A receipt correlating to exactly one envelope id.
///
/// Created by the relay when it handles a `send`. `accepted` may later
/// become `delivered` when the recipient connects; `delivered` persists
/// until the recipient acks or the envelope is redelivered on the next
/// registration. The relay does not currently push `acknowledged` receipts
/// back to senders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    /// Id of the envelope this receipt refers to.
    pub message_id: String,
    /// Delivery state.
    pub status: DeliveryStatus,
    /// Failure reason, present only for `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the relay produced this receipt.
    pub timestamp: DateTime<Utc>,
}

impl DeliveryReceipt {
    fn new(message_id: impl Into<String>, status: DeliveryStatus) -> Self {
        Self {
            message_id: message_id.into(),
            status,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Receipt for an envelope queued for an offline recipient.
    pub fn accepted(message_id: impl Into<String>) -> Self {
        Self::new(message_id, DeliveryStatus::Accepted)
    }

    /// Receipt for an envelope handed to a live connection.
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self::new(message_id, DeliveryStatus::Delivered)
    }

    /// Receipt for an envelope confirmed by the recipient application.
    pub fn acknowledged(message_id: impl Into<String>) -> Self {
        Self::new(message_id, DeliveryStatus::Acknowledged)
    }

    /// Receipt for a failed delivery.
    pub fn failed(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(message_id, DeliveryStatus::Failed)
        }
    }
}
