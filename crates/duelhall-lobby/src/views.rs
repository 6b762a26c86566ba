//! Inputs and read models returned by the lobby.

use duelhall_protocol::{Role, RoomId, RoomToken, UserId};
use duelhall_store::{Challenger, GameRoom, GameState};
use serde::{Deserialize, Serialize};

/// What a user supplies to open a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoom {
    pub creator_name: String,
    #[serde(default)]
    pub theme: Option<String>,
}

/// The public view of a room, as shown to anyone holding its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub token: RoomToken,
    pub creator_name: String,
    pub state: GameState,
    pub theme: Option<String>,
    pub challengers_count: u32,
    pub start_time: Option<u64>,
    pub finish_time: Option<u64>,
    pub created_at: u64,
}

impl From<&GameRoom> for RoomSummary {
    fn from(room: &GameRoom) -> Self {
        Self {
            token: room.token.clone(),
            creator_name: room.creator_name.clone(),
            state: room.state,
            theme: room.theme.clone(),
            challengers_count: room.challengers_count,
            start_time: room.start_time,
            finish_time: room.finish_time,
            created_at: room.created_at,
        }
    }
}

/// The owner's view of their room: the room plus every challenger, in
/// submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDetails {
    pub room: GameRoom,
    pub challengers: Vec<Challenger>,
}

/// A challenger's view of their outstanding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetails {
    pub challenger: Challenger,
    pub room: RoomSummary,
}

/// A user's home screen: which lobby actions are open to them right now.
///
/// `has_room` / `has_request` mirror the user row; while either is set,
/// `create_room` / `submit_challenge` is refused with `Conflict`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    pub user: UserId,
    pub has_room: bool,
    pub has_request: bool,
    /// The room `my_room` would show.
    pub room: Option<RoomSummary>,
    /// The room of the request `my_request` would show.
    pub request: Option<RoomSummary>,
}

/// Proof that a user may open a live connection for a room.
///
/// Issued by [`Lobby::authorize_live`](crate::Lobby::authorize_live) and
/// handed to the connection registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTicket {
    pub room_id: RoomId,
    pub token: RoomToken,
    pub user: UserId,
    pub role: Role,
    /// The only other user allowed into the session.
    pub opponent: UserId,
}
