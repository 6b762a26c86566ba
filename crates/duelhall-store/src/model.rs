//! Persistent rows and their lifecycle enums.

use std::fmt;

use duelhall_protocol::{ChallengerId, RoomId, RoomToken, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user's lobby flags.
///
/// `has_room` and `has_request` each guard an "at most one" rule: a user
/// owns at most one active room and has at most one outstanding
/// challenge. Rows are created lazily the first time a verified identity
/// reaches the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub has_room: bool,
    pub has_request: bool,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds.
    pub updated_at: u64,
}

impl User {
    /// A fresh row with both flags clear.
    pub fn new(id: UserId, now: u64) -> Self {
        Self {
            id,
            has_room: false,
            has_request: false,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Created ──(1st challenge)──▶ Waiting
///    │                            │
///    └────────(accept)────────────┴──▶ Matched ──(pair)──▶ InProgress ──▶ Finished
///
/// Created | Waiting | Matched | InProgress ──(sweeper)──▶ Expired
/// Matched ──(teardown before pairing)──▶ Finished
/// ```
///
/// - **Created / Waiting**: accepting challenges.
/// - **Matched**: one challenger accepted; waiting for both live
///   connections.
/// - **InProgress**: a live session exists.
/// - **Finished / Expired**: terminal; the row lingers until deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Created,
    Waiting,
    Matched,
    InProgress,
    Finished,
    Expired,
}

impl GameState {
    /// All states, in lifecycle order.
    pub const ALL: [GameState; 6] = [
        Self::Created,
        Self::Waiting,
        Self::Matched,
        Self::InProgress,
        Self::Finished,
        Self::Expired,
    ];

    /// Returns `true` if the room still takes challenge submissions.
    pub fn accepts_challenges(&self) -> bool {
        matches!(self, Self::Created | Self::Waiting)
    }

    /// Returns `true` if participants may open live connections.
    pub fn allows_live(&self) -> bool {
        matches!(self, Self::Matched | Self::InProgress)
    }

    /// Returns `true` for the end states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Expired)
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        use GameState::*;
        match (self, target) {
            (Created, Waiting) => true,
            (Created | Waiting, Matched) => true,
            (Matched, InProgress) => true,
            (Matched | InProgress, Finished) => true,
            (Created | Waiting | Matched | InProgress, Expired) => true,
            _ => false,
        }
    }

    /// The snake_case name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Waiting => "waiting",
            Self::Matched => "matched",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ChallengerStatus
// ---------------------------------------------------------------------------

/// Where a challenge request stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengerStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl ChallengerStatus {
    /// Only pending requests can be answered or withdrawn.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ChallengerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GameRoom
// ---------------------------------------------------------------------------

/// A hosted game invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRoom {
    pub id: RoomId,
    pub owner: UserId,
    /// The owner's display name at creation time.
    pub creator_name: String,
    pub state: GameState,
    /// Globally unique, never changes after insert.
    pub token: RoomToken,
    /// Unix milliseconds; set when a challenger is accepted.
    pub start_time: Option<u64>,
    /// Unix milliseconds; set when the live session ends.
    pub finish_time: Option<u64>,
    pub theme: Option<String>,
    pub challengers_count: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Column values for a room insert; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub owner: UserId,
    pub creator_name: String,
    pub token: RoomToken,
    pub theme: Option<String>,
    pub now: u64,
}

// ---------------------------------------------------------------------------
// Challenger
// ---------------------------------------------------------------------------

/// A user's request to play in a specific room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenger {
    pub id: ChallengerId,
    pub user: UserId,
    pub room: RoomId,
    pub nickname: String,
    pub status: ChallengerStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Column values for a challenger insert; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChallenger {
    pub user: UserId,
    pub room: RoomId,
    pub nickname: String,
    pub now: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_state_accepts_challenges_only_before_match() {
        assert!(GameState::Created.accepts_challenges());
        assert!(GameState::Waiting.accepts_challenges());
        assert!(!GameState::Matched.accepts_challenges());
        assert!(!GameState::InProgress.accepts_challenges());
        assert!(!GameState::Finished.accepts_challenges());
        assert!(!GameState::Expired.accepts_challenges());
    }

    #[test]
    fn test_game_state_allows_live_when_matched_or_in_progress() {
        let live: Vec<_> = GameState::ALL
            .into_iter()
            .filter(GameState::allows_live)
            .collect();
        assert_eq!(live, vec![GameState::Matched, GameState::InProgress]);
    }

    #[test]
    fn test_game_state_can_transition_to() {
        assert!(GameState::Created.can_transition_to(GameState::Waiting));
        assert!(GameState::Waiting.can_transition_to(GameState::Matched));
        assert!(GameState::Matched.can_transition_to(GameState::InProgress));
        assert!(GameState::InProgress.can_transition_to(GameState::Finished));
        assert!(GameState::InProgress.can_transition_to(GameState::Expired));

        assert!(!GameState::Waiting.can_transition_to(GameState::Created));
        assert!(!GameState::Created.can_transition_to(GameState::InProgress));
        assert!(!GameState::Finished.can_transition_to(GameState::Expired));
        assert!(!GameState::Expired.can_transition_to(GameState::Finished));
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions() {
        for from in [GameState::Finished, GameState::Expired] {
            assert!(from.is_terminal());
            for to in GameState::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_game_state_serializes_snake_case() {
        let json = serde_json::to_string(&GameState::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(GameState::InProgress.to_string(), "in_progress");
    }
}
