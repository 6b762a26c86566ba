//! Shared identifiers and the live wire protocol for Duelhall.
//!
//! - **Identifiers** ([`UserId`], [`RoomId`], [`ChallengerId`],
//!   [`RoomToken`]) and the stable [`ErrorKind`] taxonomy used by every
//!   layer above.
//! - **Types** ([`Envelope`], [`SystemMessage`], [`Payload`]) — the frames
//!   that travel over a live connection.
//! - **Codec** ([`Codec`], [`JsonCodec`]) — bytes ⇄ frames.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Registry (live sessions)
//! ```

mod codec;
mod error;
mod ids;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use ids::{ChallengerId, ErrorKind, RoomId, RoomToken, UserId};
pub use types::{CloseStatus, Envelope, Payload, Role, SystemMessage};
