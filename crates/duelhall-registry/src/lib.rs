//! Live connection registry for Duelhall.
//!
//! Once the owner accepts a challenger, both players open a live
//! connection bound to the room token. This crate tracks those
//! connections and pairs them:
//!
//! 1. **Registration**: an authorized [`ConnectionHandle`] joins the
//!    [`Registry`] and waits for its opponent.
//! 2. **Pairing**: when the second participant arrives, a live session
//!    is created and both sides receive [`LiveEvent::Paired`].
//! 3. **Relay**: game payloads are forwarded verbatim to the opponent.
//! 4. **Teardown**: a disconnect, an explicit end, an idle timeout or a
//!    room deletion closes both sides with a [`CloseStatus`](duelhall_protocol::CloseStatus).
//!
//! # How it fits in the stack
//!
//! ```text
//! Live server (above)  ← authorizes through the lobby, then joins here
//!     ↕
//! Registry (this crate)  ← pairs, relays, tears down
//!     ↕
//! Protocol (below)  ← provides RoomToken, Role, CloseStatus
//! ```

mod error;
mod handle;
mod registry;

pub use error::RegistryError;
pub use handle::{
    ConnectionHandle, HandleId, HandleState, JoinOutcome, LiveEvent, Outbox, RegistryConfig,
    SessionSnapshot, Teardown,
};
pub use registry::Registry;
