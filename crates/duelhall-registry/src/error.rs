//! Error types for the registry layer.

use duelhall_protocol::{ErrorKind, RoomToken};

use crate::HandleId;

/// Errors returned by [`Registry`](crate::Registry) operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The join would break a pairing rule: the room already has two
    /// participants or a live session, or the user is already registered.
    #[error("join refused for room {token}: {reason}")]
    Unauthorized { token: RoomToken, reason: String },

    /// No registered handle has this id. It was never joined, or it has
    /// already been torn down.
    #[error("connection {0} is not registered")]
    NotRegistered(HandleId),

    /// The handle is registered but still waiting for its opponent.
    #[error("connection {0} is not paired yet")]
    NotPaired(HandleId),

    /// A relayed payload exceeded the configured limit.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// The opponent's outbound channel is closed.
    #[error("peer of room {0} is gone")]
    PeerGone(RoomToken),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::NotRegistered(_) => ErrorKind::NotFound,
            Self::NotPaired(_) | Self::PayloadTooLarge { .. } => ErrorKind::InvalidState,
            Self::PeerGone(_) => ErrorKind::Transient,
        }
    }
}
