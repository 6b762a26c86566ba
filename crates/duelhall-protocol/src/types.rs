//! Live-connection wire format.
//!
//! Every frame exchanged over a live connection is an [`Envelope`]. The
//! payload is either a [`SystemMessage`] (handshake, pairing, heartbeat,
//! teardown) that the server interprets, or opaque game bytes that are
//! relayed verbatim to the opponent.
//!
//! ```text
//! client                         server                        opponent
//!   │ Handshake{token, room}  ──▶  │
//!   │ ◀── HandshakeAck{role}       │
//!   │          ...waits for the other participant...
//!   │ ◀── Paired{opponent}         │  Paired{opponent} ──▶        │
//!   │ Game(bytes)             ──▶  │  Game(bytes)      ──▶        │
//!   │ EndGame                 ──▶  │  SessionClosed    ──▶        │
//! ```

use serde::{Deserialize, Serialize};

use crate::{ErrorKind, RoomToken, UserId};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which side of a match a participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The user who created the room.
    Owner,
    /// The user whose challenge was accepted.
    Challenger,
}

impl Role {
    /// The opposite side.
    pub fn opponent(self) -> Self {
        match self {
            Self::Owner => Self::Challenger,
            Self::Challenger => Self::Owner,
        }
    }
}

// ---------------------------------------------------------------------------
// CloseStatus
// ---------------------------------------------------------------------------

/// Terminal status reported to both sides when a live session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseStatus {
    /// A participant sent an explicit end-game message.
    Finished,
    /// The opponent's connection closed or failed.
    PeerDisconnected,
    /// No game traffic for the configured idle interval.
    IdleTimeout,
    /// The owner deleted the room.
    RoomDeleted,
    /// The sweeper force-expired the room.
    Expired,
    /// Delivery to a participant failed; the session cannot continue.
    RelayError,
    /// The server is shutting down.
    Shutdown,
}

// ---------------------------------------------------------------------------
// SystemMessage
// ---------------------------------------------------------------------------

/// Server-interpreted messages. Internally tagged:
/// `{ "type": "Paired", "opponent": 7 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemMessage {
    // -- Connection lifecycle --
    /// Client → Server, first frame: protocol version, identity token,
    /// and the room the client wants to play in.
    Handshake {
        version: u32,
        token: Option<String>,
        room: RoomToken,
    },

    /// Server → Client: identity verified and the handle is registered.
    HandshakeAck {
        user_id: UserId,
        room: RoomToken,
        role: Role,
    },

    /// Server → Client: both participants are present, the match is live.
    Paired { opponent: UserId },

    // -- Heartbeat --
    /// Client → Server keep-alive. Does not count as game traffic.
    Heartbeat { client_time: u64 },

    /// Server → Client keep-alive reply.
    HeartbeatAck { client_time: u64, server_time: u64 },

    // -- Teardown --
    /// Client → Server: the match is over.
    EndGame { reason: Option<String> },

    /// Server → Client: the session has ended; no more frames follow.
    SessionClosed { status: CloseStatus },

    // -- Errors --
    /// Server → Client: a request failed.
    Error { kind: ErrorKind, message: String },
}

// ---------------------------------------------------------------------------
// Payload / Envelope
// ---------------------------------------------------------------------------

/// Adjacently tagged: `{ "type": "Game", "data": [1, 2, 3] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// A server-interpreted message.
    System(SystemMessage),

    /// Game-state bytes, opaque to the server and relayed verbatim.
    Game(Vec<u8>),
}

/// The top-level frame on a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-direction sequence number.
    pub seq: u64,

    /// Milliseconds since the sender's connection started.
    pub timestamp: u64,

    pub payload: Payload,
}

impl Envelope {
    /// Wraps a system message.
    pub fn system(seq: u64, timestamp: u64, msg: SystemMessage) -> Self {
        Self {
            seq,
            timestamp,
            payload: Payload::System(msg),
        }
    }

    /// Wraps opaque game bytes.
    pub fn game(seq: u64, timestamp: u64, data: Vec<u8>) -> Self {
        Self {
            seq,
            timestamp,
            payload: Payload::Game(data),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
