//! Room and challenge lifecycle for Duelhall.
//!
//! A player opens a room and shares its token; others file challenges
//! against the token; the owner accepts one (every rival is rejected in
//! the same transaction) and the pair moves on to a live session.
//!
//! # Key types
//!
//! - [`Lobby`]: every lifecycle operation, each in one store transaction
//! - [`CreateRoom`], [`RoomDetails`], [`RequestDetails`], [`RoomSummary`],
//!   [`UserStatus`]: inputs and read models
//! - [`LiveTicket`]: proof that a user may open a live connection
//! - [`LobbyConfig`], [`Clock`]: tunables and the time source

mod config;
mod error;
mod lobby;
mod views;

pub use config::{Clock, LobbyConfig, ManualClock, SystemClock};
pub use error::LobbyError;
pub use lobby::{Lobby, random_token};
pub use views::{
    CreateRoom, LiveTicket, RequestDetails, RoomDetails, RoomSummary, UserStatus,
};
