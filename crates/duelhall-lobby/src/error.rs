//! Error types for the lobby layer.

use duelhall_protocol::{ErrorKind, RoomToken};
use duelhall_store::StoreError;

/// Errors surfaced by [`Lobby`](crate::Lobby) operations.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// The caller may not open a live connection for this room.
    #[error("not authorized for room {0}")]
    Unauthorized(RoomToken),

    /// The caller is not the owner of the room or request.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Unknown token, room, or challenger.
    #[error("{0} not found")]
    NotFound(String),

    /// An at-most-one rule would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The target is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The caller tried to challenge their own room.
    #[error("cannot challenge your own room")]
    SelfChallenge,

    /// Input failed validation (empty or oversized name).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LobbyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidState(_) | Self::InvalidInput(_) => ErrorKind::InvalidState,
            Self::SelfChallenge => ErrorKind::SelfChallenge,
            Self::Store(e) => e.kind(),
        }
    }

    /// Returns `true` if the whole operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}
