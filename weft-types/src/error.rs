//! Error types for weft-types.

use thiserror::Error;

/// Errors arising while encoding or decoding wire types.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON (de)serialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }

    #[test]
    fn json_error_display_mentions_cause() {
        let err = serde_json::from_str::<crate::ClientFrame>("{").unwrap_err();
        let wire: WireError = err.into();
        assert!(wire.to_string().starts_with("json error:"));
    }
}
