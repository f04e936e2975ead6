//! # weft-relay
//!
//! Store-and-forward relay server for the Weft protocol.
//!
//! This crate implements a relay that:
//! - Accepts WebSocket connections carrying one JSON frame per message
//! - Maps DIDs to one-or-more live connections (multi-device)
//! - Fans envelopes out to every live connection of the recipient DID
//! - Queues envelopes durably for offline recipients (SQLite mailbox)
//! - Redelivers everything unacknowledged on each registration
//! - Never parses envelope payloads (routing on `toDid`/`fromDid`/`id` only)
//!
//! ## Architecture
//!
//! ```text
//! Peer A ──┐                      ┌── Peer B (phone)
//!          │     WebSocket        ├── Peer B (laptop)
//!          ├─────────────────────►│
//!      ┌───┴──────────────────────┴───┐
//!      │          weft-relay          │
//!      │  ┌────────────────────────┐  │
//!      │  │   SQLite (mailbox)     │  │
//!      │  └────────────────────────┘  │
//!      └──────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Client frames: `register`, `send`, `ack`, `ping`.
//! Server frames: `registered`, `message`, `receipt`, `error`, `pong`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod mailbox;
pub mod server;
pub mod session;
