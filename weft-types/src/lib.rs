//! # weft-types
//!
//! Wire format types for the Weft relay protocol.
//!
//! This crate provides the foundational types used across all Weft crates:
//! - [`Did`] - decentralized identifier of a peer
//! - [`MessageEnvelope`] - the signed, routable unit of cross-peer communication
//! - [`DeliveryReceipt`] - per-envelope delivery state reported by the relay
//! - [`ClientFrame`] / [`ServerFrame`] - the JSON wire protocol
//! - [`WireError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod did;
mod envelope;
mod error;
mod frames;
mod receipt;

pub use did::Did;
pub use envelope::{MessageEnvelope, MessageKind, PayloadEncoding, PROTOCOL_VERSION};
pub use error::WireError;
pub use frames::{error_code, ClientFrame, ServerFrame};
pub use receipt::{DeliveryReceipt, DeliveryStatus};
