//! Error types for the protocol layer.

use crate::ErrorKind;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes were not a valid frame (malformed JSON, missing
    /// fields, unknown message type).
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but breaks a protocol rule, e.g. a first frame
    /// that is not a handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// Protocol failures are the client's fault and never retryable.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidState
    }
}
