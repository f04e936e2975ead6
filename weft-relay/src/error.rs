//! Error types for weft-relay.

use std::path::PathBuf;

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox storage errors.
///
/// These are hard failures: a `send` whose enqueue fails must surface an
/// error to the sender, never a silent `accepted`.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored envelope could not be decoded.
    #[error("corrupt mailbox row for {recipient}: {reason}")]
    Corrupt {
        /// Recipient DID whose row is corrupt.
        recipient: String,
        /// Decode failure description.
        reason: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame was not valid JSON or not a known frame shape.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Reason the frame is invalid.
        reason: String,
    },

    /// Operation requires a registered connection.
    #[error("connection not registered")]
    NotRegistered,

    /// Envelope has no recipient DID.
    #[error("envelope has no recipient")]
    MissingRecipient,

    /// Sender exceeded a message quota.
    #[error("rate limited: {reason}")]
    RateLimited {
        /// Which quota was exceeded.
        reason: String,
    },
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
