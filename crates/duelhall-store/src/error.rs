//! Error types for the store layer.

use duelhall_protocol::ErrorKind;

/// Failures reported by a [`Store`](crate::Store) or
/// [`EphemeralStore`](crate::EphemeralStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached, or aborted the transaction
    /// (serialization failure, deadlock victim). Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A unique constraint rejected the write.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// An update or delete targeted a row that does not exist.
    #[error("row not found: {0}")]
    Missing(String),
}

impl StoreError {
    /// Maps the failure onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::Transient,
            Self::Duplicate(_) => ErrorKind::Conflict,
            Self::Missing(_) => ErrorKind::NotFound,
        }
    }

    /// Returns `true` if re-running the whole transaction may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
