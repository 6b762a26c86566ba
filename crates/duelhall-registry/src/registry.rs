//! The connection registry: pairs live connections into sessions.
//!
//! This is the in-memory half of a match. The lobby decides WHO may
//! connect to a room; the registry tracks who actually did, pairs the two
//! participants into a [`LiveSession`], relays their game traffic, and
//! tears the session down when either side leaves.
//!
//! # Concurrency note
//!
//! All bookkeeping lives behind one `tokio::sync::Mutex`, so join, pair
//! and teardown are atomic with respect to each other. Lock sections
//! never await: every operation decides under the lock, collects the
//! events it has to deliver, releases the lock, and only then pushes the
//! events into the recipients' outboxes.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use duelhall_protocol::{CloseStatus, Role, RoomToken, UserId};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::handle::LiveSession;
use crate::{
    ConnectionHandle, HandleId, HandleState, JoinOutcome, LiveEvent, Outbox, RegistryConfig,
    RegistryError, SessionSnapshot, Teardown,
};

/// Events collected under the lock, delivered after it is released.
type Deliveries = Vec<(Outbox, LiveEvent)>;

fn deliver(deliveries: Deliveries) {
    for (outbox, event) in deliveries {
        // A closed outbox means that connection's writer already exited;
        // nothing is waiting for the event.
        let _ = outbox.send(event);
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Every registered handle, keyed by id.
    handles: HashMap<HandleId, ConnectionHandle>,

    /// Registered handles per room, in join order. At most two.
    by_token: HashMap<RoomToken, Vec<HandleId>>,

    /// Which handle each user holds. A user participates in at most one
    /// registration at a time.
    by_user: HashMap<UserId, HandleId>,

    /// Live sessions, keyed by room token.
    sessions: HashMap<RoomToken, LiveSession>,
}

impl Inner {
    /// Unregisters one handle and marks it closed.
    fn remove_handle(&mut self, id: HandleId) -> Option<ConnectionHandle> {
        let mut handle = self.handles.remove(&id)?;
        if self.by_user.get(&handle.user()) == Some(&id) {
            self.by_user.remove(&handle.user());
        }
        if let Some(ids) = self.by_token.get_mut(&handle.token) {
            ids.retain(|h| *h != id);
            if ids.is_empty() {
                self.by_token.remove(&handle.token);
            }
        }
        handle.state = HandleState::Closed;
        Some(handle)
    }

    /// Removes every handle bound to `token`, and its session if any.
    fn tear_down(
        &mut self,
        token: &RoomToken,
        status: CloseStatus,
        deliveries: &mut Deliveries,
    ) -> Option<Teardown> {
        let was_live = self.sessions.remove(token).is_some();
        let ids = self.by_token.get(token).cloned().unwrap_or_default();
        let handles: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.remove_handle(id))
            .collect();
        if handles.is_empty() {
            return None;
        }
        for handle in &handles {
            deliveries.push((handle.outbox.clone(), LiveEvent::Closed { status }));
        }
        Some(Teardown {
            token: token.clone(),
            status,
            handles,
            was_live,
        })
    }
}

/// Tracks every live connection and pairs them into sessions.
///
/// Cheap to share: wrap it in an `Arc` and hand clones to each
/// connection task.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
    config: RegistryConfig,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Registers an authorized handle.
    ///
    /// If the opponent is already waiting, both handles become
    /// [`HandleState::Active`], a session is created, and each side
    /// receives [`LiveEvent::Paired`].
    ///
    /// # Errors
    /// [`RegistryError::Unauthorized`] if the room already has a live
    /// session or two participants, if the user already holds a handle
    /// (for this room or any other), or if the waiting handle is not the
    /// expected opponent.
    pub async fn join(&self, mut handle: ConnectionHandle) -> Result<JoinOutcome, RegistryError> {
        let refuse = |reason: &str| RegistryError::Unauthorized {
            token: handle.token.clone(),
            reason: reason.to_string(),
        };

        let mut deliveries = Deliveries::new();
        let outcome = {
            let mut inner = self.inner.lock().await;

            if inner.sessions.contains_key(&handle.token) {
                return Err(refuse("session already live"));
            }
            if inner.by_user.contains_key(&handle.user()) {
                return Err(refuse("user already connected"));
            }
            let waiting = inner.by_token.get(&handle.token).cloned().unwrap_or_default();
            if waiting.len() >= 2 {
                return Err(refuse("room already has two participants"));
            }
            let peer = match waiting.first() {
                Some(id) => {
                    let peer = inner
                        .handles
                        .get(id)
                        .ok_or_else(|| refuse("stale registration"))?;
                    if peer.user() != handle.opponent || peer.opponent != handle.user() {
                        return Err(refuse("waiting participant is not the expected opponent"));
                    }
                    Some(*id)
                }
                None => None,
            };

            let id = handle.id;
            let user = handle.user();
            let opponent = handle.opponent;
            let token = handle.token.clone();
            handle.state = HandleState::Joined;
            inner.by_user.insert(user, id);
            inner.by_token.entry(token.clone()).or_default().push(id);
            inner.handles.insert(id, handle);

            match peer {
                None => {
                    tracing::debug!(room_token = %token, user_id = %user, handle = %id, "waiting for opponent");
                    JoinOutcome::Waiting
                }
                Some(peer_id) => {
                    let mut pair = Vec::with_capacity(2);
                    for hid in [id, peer_id] {
                        if let Some(h) = inner.handles.get_mut(&hid) {
                            h.state = HandleState::Active;
                            pair.push((hid, h.role, h.user(), h.opponent, h.outbox.clone()));
                        }
                    }
                    let (owner, challenger) = match pair.iter().find(|p| p.1 == Role::Owner) {
                        Some(p) if p.0 == id => (id, peer_id),
                        _ => (peer_id, id),
                    };
                    let now = Instant::now();
                    inner.sessions.insert(
                        token.clone(),
                        LiveSession {
                            token: token.clone(),
                            owner,
                            challenger,
                            started_at: now,
                            last_activity: now,
                            relay_count: 0,
                            last_payload: None,
                        },
                    );
                    for (_, role, _, their_opponent, outbox) in pair {
                        deliveries.push((
                            outbox,
                            LiveEvent::Paired {
                                opponent: their_opponent,
                                role,
                            },
                        ));
                    }
                    tracing::info!(room_token = %token, "session paired");
                    JoinOutcome::Paired { opponent }
                }
            }
        };

        deliver(deliveries);
        Ok(outcome)
    }

    /// Forwards a game payload to the sender's opponent, verbatim.
    ///
    /// Counts as session activity for idle reaping.
    pub async fn relay(&self, from: HandleId, payload: Vec<u8>) -> Result<(), RegistryError> {
        if payload.len() > self.config.max_payload_bytes {
            return Err(RegistryError::PayloadTooLarge {
                len: payload.len(),
                max: self.config.max_payload_bytes,
            });
        }

        let (token, outbox) = {
            let mut inner = self.inner.lock().await;
            let handle = inner
                .handles
                .get(&from)
                .ok_or(RegistryError::NotRegistered(from))?;
            if handle.state != HandleState::Active {
                return Err(RegistryError::NotPaired(from));
            }
            let token = handle.token.clone();

            let session = inner
                .sessions
                .get_mut(&token)
                .ok_or(RegistryError::NotPaired(from))?;
            let peer = session.peer_of(from).ok_or(RegistryError::NotPaired(from))?;
            session.last_activity = Instant::now();
            session.relay_count += 1;
            session.last_payload = Some(payload.clone());

            let outbox = inner
                .handles
                .get(&peer)
                .map(|h| h.outbox.clone())
                .ok_or_else(|| RegistryError::PeerGone(token.clone()))?;
            (token, outbox)
        };

        tracing::trace!(room_token = %token, handle = %from, bytes = payload.len(), "relay");
        outbox
            .send(LiveEvent::Relay(payload))
            .map_err(|_| RegistryError::PeerGone(token))
    }

    /// Removes a connection that closed, failed, or ended the game.
    ///
    /// If the handle was part of a live session, the whole session is
    /// torn down: both handles are closed and each receives
    /// [`LiveEvent::Closed`] with `status`. A handle that was still
    /// waiting is simply removed and `None` is returned, so the room stays
    /// open for a reconnect.
    pub async fn leave(&self, id: HandleId, status: CloseStatus) -> Option<Teardown> {
        let mut deliveries = Deliveries::new();
        let teardown = {
            let mut inner = self.inner.lock().await;
            let token = inner.handles.get(&id)?.token.clone();
            if inner.sessions.contains_key(&token) {
                inner.tear_down(&token, status, &mut deliveries)
            } else {
                if let Some(handle) = inner.remove_handle(id) {
                    deliveries.push((handle.outbox.clone(), LiveEvent::Closed { status }));
                    tracing::debug!(room_token = %token, handle = %id, "waiting connection left");
                }
                None
            }
        };
        deliver(deliveries);

        if let Some(t) = &teardown {
            tracing::info!(room_token = %t.token, status = ?t.status, "session closed");
        }
        teardown
    }

    /// Tears down whatever is bound to `token`: a live session or a lone
    /// waiting handle. Used when the room is deleted or expired.
    pub async fn terminate(&self, token: &RoomToken, status: CloseStatus) -> Option<Teardown> {
        let mut deliveries = Deliveries::new();
        let teardown = self
            .inner
            .lock()
            .await
            .tear_down(token, status, &mut deliveries);
        deliver(deliveries);

        if teardown.is_some() {
            tracing::info!(room_token = %token, status = ?status, "session terminated");
        }
        teardown
    }

    /// Closes every session without relayed traffic for `idle_timeout`.
    ///
    /// Heartbeats do not count as activity; only game payloads do.
    pub async fn reap_idle(&self, idle_timeout: Duration) -> Vec<Teardown> {
        let mut deliveries = Deliveries::new();
        let reaped: Vec<_> = {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let idle: Vec<_> = inner
                .sessions
                .values()
                .filter(|s| now.duration_since(s.last_activity) >= idle_timeout)
                .map(|s| s.token.clone())
                .collect();
            idle.iter()
                .filter_map(|token| {
                    inner.tear_down(token, CloseStatus::IdleTimeout, &mut deliveries)
                })
                .collect()
        };
        deliver(deliveries);

        for t in &reaped {
            tracing::info!(room_token = %t.token, "idle session reaped");
        }
        reaped
    }

    /// Closes everything. Used on server shutdown.
    pub async fn shutdown(&self) -> Vec<Teardown> {
        let mut deliveries = Deliveries::new();
        let closed: Vec<_> = {
            let mut inner = self.inner.lock().await;
            let tokens: Vec<_> = inner.by_token.keys().cloned().collect();
            tokens
                .iter()
                .filter_map(|token| {
                    inner.tear_down(token, CloseStatus::Shutdown, &mut deliveries)
                })
                .collect()
        };
        deliver(deliveries);
        closed
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// State of a registered handle. Removed handles return `None`.
    pub async fn handle_state(&self, id: HandleId) -> Option<HandleState> {
        self.inner.lock().await.handles.get(&id).map(|h| h.state)
    }

    /// Returns `true` if `token` has a paired session.
    pub async fn is_live(&self, token: &RoomToken) -> bool {
        self.inner.lock().await.sessions.contains_key(token)
    }

    /// Tokens with at least one registered connection, paired or waiting.
    pub async fn live_tokens(&self) -> HashSet<RoomToken> {
        self.inner.lock().await.by_token.keys().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.handles.len()
    }

    /// A copy of the session for `token`, if it is live.
    pub async fn session(&self, token: &RoomToken) -> Option<SessionSnapshot> {
        let inner = self.inner.lock().await;
        let session = inner.sessions.get(token)?;
        let user_of = |id: HandleId| inner.handles.get(&id).map(ConnectionHandle::user);
        let now = Instant::now();
        Some(SessionSnapshot {
            token: session.token.clone(),
            owner: user_of(session.owner)?,
            challenger: user_of(session.challenger)?,
            relay_count: session.relay_count,
            last_payload: session.last_payload.clone(),
            live_for: now.duration_since(session.started_at),
            idle_for: now.duration_since(session.last_activity),
        })
    }
}
