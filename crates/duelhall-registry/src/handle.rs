//! Handle types: the registry's record of one live connection.
//!
//! A "handle" is what the registry knows about a connection:
//! - WHO is on the other end (the verified [`Identity`])
//! - WHICH room it is bound to and in what [`Role`]
//! - WHAT state it is in ([`HandleState`])
//! - HOW to reach it (an unbounded [`Outbox`] drained by the connection's
//!   writer task)

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use duelhall_identity::Identity;
use duelhall_protocol::{CloseStatus, Role, RoomToken, UserId};
use tokio::sync::mpsc;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Registry tunables.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// A session with no relayed game traffic for this long is reaped by
    /// [`Registry::reap_idle`](crate::Registry::reap_idle).
    ///
    /// Default: 5 minutes.
    pub idle_timeout: Duration,

    /// Largest game payload `relay` accepts, in bytes.
    ///
    /// Default: 64 KiB.
    pub max_payload_bytes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            max_payload_bytes: 64 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// HandleId
// ---------------------------------------------------------------------------

/// Process-unique id of a live connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(pub u64);

impl HandleId {
    /// Allocates the next id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// HandleState
// ---------------------------------------------------------------------------

/// Lifecycle of a handle.
///
/// ```text
///   Connecting ──(join)──→ Joined ──(opponent joins)──→ Active
///        │                   │                            │
///        └───────────────────┴──(leave / terminate)───────┴──→ Closed
/// ```
///
/// - **Connecting**: built by the caller, not yet registered.
/// - **Joined**: registered, waiting for the opponent.
/// - **Active**: part of a live session; game traffic is relayed.
/// - **Closed**: torn down and removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    Connecting,
    Joined,
    Active,
    Closed,
}

// ---------------------------------------------------------------------------
// LiveEvent / Outbox
// ---------------------------------------------------------------------------

/// Something the registry delivers to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// Both participants are present; the session is live.
    Paired { opponent: UserId, role: Role },
    /// Opaque game bytes from the opponent.
    Relay(Vec<u8>),
    /// The session is over. Nothing follows this event.
    Closed { status: CloseStatus },
}

/// The registry's side of a connection's outbound queue.
///
/// Unbounded so that delivering never awaits: the registry hands an
/// event over and moves on, and a slow reader only grows its own queue.
pub type Outbox = mpsc::UnboundedSender<LiveEvent>;

// ---------------------------------------------------------------------------
// ConnectionHandle
// ---------------------------------------------------------------------------

/// One live connection bound to one room.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: HandleId,
    pub identity: Identity,
    pub token: RoomToken,
    pub role: Role,
    /// The only user this handle may be paired with.
    pub opponent: UserId,
    pub state: HandleState,
    pub(crate) outbox: Outbox,
}

impl ConnectionHandle {
    /// A fresh handle in [`HandleState::Connecting`].
    pub fn new(
        identity: Identity,
        token: RoomToken,
        role: Role,
        opponent: UserId,
        outbox: Outbox,
    ) -> Self {
        Self {
            id: HandleId::next(),
            identity,
            token,
            role,
            opponent,
            state: HandleState::Connecting,
            outbox,
        }
    }

    pub fn user(&self) -> UserId {
        self.identity.user_id
    }
}

// ---------------------------------------------------------------------------
// LiveSession
// ---------------------------------------------------------------------------

/// Two paired handles plus the in-memory turn state.
#[derive(Debug)]
pub(crate) struct LiveSession {
    pub(crate) token: RoomToken,
    pub(crate) owner: HandleId,
    pub(crate) challenger: HandleId,
    pub(crate) started_at: Instant,
    pub(crate) last_activity: Instant,
    pub(crate) relay_count: u64,
    pub(crate) last_payload: Option<Vec<u8>>,
}

impl LiveSession {
    /// The other participant, or `None` if `id` is not in this session.
    pub(crate) fn peer_of(&self, id: HandleId) -> Option<HandleId> {
        if id == self.owner {
            Some(self.challenger)
        } else if id == self.challenger {
            Some(self.owner)
        } else {
            None
        }
    }
}

/// A point-in-time copy of a session, for callers outside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub token: RoomToken,
    pub owner: UserId,
    pub challenger: UserId,
    /// Game payloads relayed so far, in both directions.
    pub relay_count: u64,
    /// The most recently relayed payload.
    pub last_payload: Option<Vec<u8>>,
    pub live_for: Duration,
    pub idle_for: Duration,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened on [`Registry::join`](crate::Registry::join).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Registered; the opponent is not here yet.
    Waiting,
    /// The opponent was already waiting; the session is now live.
    Paired { opponent: UserId },
}

/// A session (or a lone waiting handle) that was torn down.
#[derive(Debug, Clone)]
pub struct Teardown {
    pub token: RoomToken,
    pub status: CloseStatus,
    /// The removed handles, now [`HandleState::Closed`].
    pub handles: Vec<ConnectionHandle>,
    /// `true` if the handles had been paired into a live session.
    pub was_live: bool,
}

impl Teardown {
    pub fn users(&self) -> Vec<UserId> {
        self.handles.iter().map(ConnectionHandle::user).collect()
    }
}
