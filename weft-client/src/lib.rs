//! # weft-client
//!
//! Client transport adapter for the Weft relay protocol.
//!
//! This crate provides [`RelayClient`], the peer-side counterpart of the
//! relay: it connects, registers a DID, sends envelopes and awaits their
//! delivery receipts, fans inbound envelopes out to subscribers (acking
//! automatically once one has processed the message), and keeps the
//! connection alive with a ping/pong heartbeat.
//!
//! # Architecture
//!
//! ```text
//! Application → RelayClient → Transport → Relay
//! ```
//!
//! The [`Transport`] trait abstracts the underlying connection mechanism;
//! [`WsTransport`] speaks WebSocket and [`MockTransport`] backs the tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod adapter;
pub mod transport;

pub use adapter::{ClientConfig, ClientError, LinkState, MessageCallback, RelayClient};
pub use transport::{MockTransport, Transport, TransportError, WsTransport};
