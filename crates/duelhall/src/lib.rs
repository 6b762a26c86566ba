//! # Duelhall
//!
//! Two-party matchmaking and live-session relay for turn-based games.
//!
//! One player opens a room and shares its invite token; other players
//! challenge it; the owner accepts one. The accepted pair then opens live
//! connections with the token, the server pairs them, and game traffic is
//! relayed verbatim until either side ends the match, disconnects, or
//! goes idle.
//!
//! This crate is the facade over the layered workspace:
//!
//! ```text
//! LiveServer (WebSocket) ─┐
//!                         ├→ Duelhall ─┬→ Lobby (rooms, challenges) → Store
//! HTTP layer (yours) ─────┘            ├→ Registry (live sessions)
//!                                      └→ EphemeralStore (presence hints)
//! Sweeper ──────────────────→ Duelhall::sweep
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use duelhall::prelude::*;
//!
//! # async fn run() -> Result<(), DuelhallError> {
//! duelhall::init_tracing();
//! let config = ServerConfig::from_env()?;
//! let app = Duelhall::builder(MemoryStore::new(), MemoryEphemeralStore::new())
//!     .config(config.app)
//!     .build();
//! let sweeper = app.spawn_sweeper();
//! let server = LiveServerBuilder::new()
//!     .bind(&config.bind)
//!     .build(app, JwtAuthenticator::new(config.jwt_secret.as_bytes()))
//!     .await?;
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! sweeper.stop().await;
//! # Ok(())
//! # }
//! ```

mod app;
mod config;
mod error;
mod handler;
mod server;

pub use app::{Duelhall, DuelhallBuilder, LiveConnection};
pub use config::{ConfigError, DEFAULT_BIND, DuelhallConfig, ServerConfig, SweepSettings};
pub use error::DuelhallError;
pub use server::{LiveServer, LiveServerBuilder, PROTOCOL_VERSION};

/// Installs a `tracing` subscriber that honours `RUST_LOG`, falling back
/// to `info`. Calling it twice is harmless.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Everything needed to embed or run a Duelhall server.
pub mod prelude {
    pub use crate::{
        ConfigError, Duelhall, DuelhallBuilder, DuelhallConfig, DuelhallError, LiveConnection,
        LiveServer, LiveServerBuilder, PROTOCOL_VERSION, ServerConfig, SweepSettings,
    };
    pub use duelhall_identity::{
        AuthError, Authenticator, Identity, JwtAuthenticator, StaticAuthenticator,
        SubscriptionTier,
    };
    pub use duelhall_lobby::{
        Clock, CreateRoom, LobbyConfig, LobbyError, ManualClock, RequestDetails, RoomDetails,
        RoomSummary, SystemClock, UserStatus,
    };
    pub use duelhall_protocol::{
        ChallengerId, CloseStatus, Codec, Envelope, ErrorKind, JsonCodec, Payload, Role, RoomId,
        RoomToken, SystemMessage, UserId,
    };
    pub use duelhall_registry::{
        HandleId, HandleState, LiveEvent, Outbox, Registry, RegistryConfig, RegistryError,
        SessionSnapshot,
    };
    pub use duelhall_store::{
        Challenger, ChallengerStatus, EphemeralStore, GameRoom, GameState, MemoryEphemeralStore,
        MemoryStore, Store, StoreError, User,
    };
    pub use duelhall_sweeper::{SweepError, SweepReport, SweeperConfig, SweeperHandle};
}
