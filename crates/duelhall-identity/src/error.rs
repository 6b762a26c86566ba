//! Error types for the identity layer.

use duelhall_protocol::ErrorKind;

/// Why a presented token did not yield an identity.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No token was presented at all.
    #[error("missing identity token")]
    MissingToken,

    /// The token's lifetime has passed.
    #[error("identity token expired")]
    Expired,

    /// Bad signature, malformed token, or claims of the wrong shape.
    #[error("invalid identity token: {0}")]
    Invalid(String),
}

impl AuthError {
    /// Every identity failure surfaces as `unauthorized`.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Unauthorized
    }
}
