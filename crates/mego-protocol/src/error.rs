//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding failed.
    #[error("failed to encode MessagePack message: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("invalid MessagePack message: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    /// Message exceeds the allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Empty frame received.
    #[error("empty message")]
    EmptyMessage,
}
