//! Identifiers shared by every Duelhall layer.
//!
//! These are "newtype wrappers": each wraps a primitive so a `RoomId`
//! can never be passed where a `UserId` is expected, even though both
//! are `u64` underneath. `#[serde(transparent)]` keeps the JSON shape a
//! plain number (or string, for [`RoomToken`]).

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Row identifiers
// ---------------------------------------------------------------------------

/// A verified user's identifier, as supplied by the identity context.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// Primary key of a persisted game room.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Primary key of a persisted challenge request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChallengerId(pub u64);

impl fmt::Display for ChallengerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RoomToken
// ---------------------------------------------------------------------------

/// The invite token a room owner shares with would-be challengers.
///
/// Globally unique and immutable once minted. The live connection is
/// also keyed by this token, so it doubles as the session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomToken(String);

impl RoomToken {
    /// Wraps an existing token string (e.g. one read from a request path).
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrows the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable, machine-readable classification of every surfaced error.
///
/// Each crate's error enum maps onto one of these through a `kind()`
/// method. The surrounding API layer (HTTP, live socket) reports the
/// kind verbatim so clients can branch on it without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid identity.
    Unauthorized,
    /// Valid identity, but not allowed to touch the target resource.
    Forbidden,
    /// Unknown token, room or challenger.
    NotFound,
    /// A uniqueness or at-most-one rule would be violated.
    Conflict,
    /// The operation does not fit the current lifecycle state.
    InvalidState,
    /// A user tried to challenge their own room.
    SelfChallenge,
    /// Store or network failure; safe to retry.
    Transient,
}

impl ErrorKind {
    /// The snake_case code used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidState => "invalid_state",
            Self::SelfChallenge => "self_challenge",
            Self::Transient => "transient",
        }
    }

    /// Whether a caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
