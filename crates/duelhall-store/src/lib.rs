//! Storage contracts for Duelhall.
//!
//! The lobby consumes two external collaborators:
//!
//! - a **persistent store** ([`Store`] / [`Transaction`]) holding
//!   [`User`], [`GameRoom`] and [`Challenger`] rows with explicit
//!   transaction boundaries, and
//! - an **ephemeral store** ([`EphemeralStore`]) for short-lived
//!   presence hints with a TTL.
//!
//! [`MemoryStore`] and [`MemoryEphemeralStore`] are complete in-process
//! implementations used by the tests and the demo server. `MemoryStore`
//! also supports fault injection so cascade atomicity can be tested.

#![allow(async_fn_in_trait)]

mod ephemeral;
mod error;
mod memory;
mod model;
mod store;

pub use ephemeral::{EphemeralStore, MemoryEphemeralStore};
pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTx};
pub use model::{
    Challenger, ChallengerStatus, GameRoom, GameState, NewChallenger, NewRoom, User,
};
pub use store::{Store, Transaction};
