//! Unified error type for the Duelhall facade.

use duelhall_identity::AuthError;
use duelhall_lobby::LobbyError;
use duelhall_protocol::{ErrorKind, ProtocolError};
use duelhall_registry::RegistryError;
use duelhall_store::StoreError;
use duelhall_transport::TransportError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically. [`kind`](Self::kind)
/// collapses any of them onto the shared [`ErrorKind`] taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum DuelhallError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lobby(#[from] LobbyError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DuelhallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transient,
            Self::Protocol(e) => e.kind(),
            Self::Auth(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Lobby(e) => e.kind(),
            Self::Registry(e) => e.kind(),
            Self::Config(_) => ErrorKind::InvalidState,
        }
    }
}
