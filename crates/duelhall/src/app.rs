//! The `Duelhall` facade: one object that owns the lobby, the registry
//! and the presence cache, and keeps them consistent with each other.
//!
//! The lobby and the registry never call each other. Everything that
//! spans both lives here:
//!
//! - deleting a room also tears down its live session;
//! - the second live join flips the room to `in_progress`;
//! - a session that ends flips the room to `finished`;
//! - the cleanup pass feeds the registry's live tokens to the lobby and
//!   the lobby's expired rooms back to the registry.
//!
//! A session leaves the registry before its room is marked finished. If
//! that store write fails, the room is remembered as unsettled: the next
//! cleanup pass finishes it, and until then it is never expired as an
//! orphan.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use duelhall_identity::Identity;
use duelhall_lobby::{
    Clock, CreateRoom, Lobby, LobbyError, RequestDetails, RoomDetails, RoomSummary, SystemClock,
    UserStatus,
};
use duelhall_protocol::{ChallengerId, CloseStatus, ErrorKind, Role, RoomToken, UserId};
use duelhall_registry::{
    ConnectionHandle, HandleId, JoinOutcome, Outbox, Registry, RegistryError, Teardown,
};
use duelhall_store::{Challenger, EphemeralStore, GameRoom, Store};
use duelhall_sweeper::{SweepError, SweepJob, SweepReport, Sweeper, SweeperConfig, SweeperHandle};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{DuelhallConfig, DuelhallError, SweepSettings};

/// Key of the presence hint for `user`.
fn presence_key(user: UserId) -> String {
    format!("presence:{}", user.0)
}

/// Whether a session that closed with `status` means the game is over.
///
/// Deletion and expiry already settled the room; a shutdown leaves it
/// for the next process to reconcile.
fn ends_game(status: CloseStatus) -> bool {
    matches!(
        status,
        CloseStatus::Finished
            | CloseStatus::PeerDisconnected
            | CloseStatus::IdleTimeout
            | CloseStatus::RelayError
    )
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and builds a [`Duelhall`].
///
/// ```rust,ignore
/// let app = Duelhall::builder(MemoryStore::new(), MemoryEphemeralStore::new())
///     .sweep(SweepSettings { interval: Duration::from_secs(30), ..Default::default() })
///     .build();
/// ```
pub struct DuelhallBuilder<S, E, C = SystemClock> {
    store: S,
    presence: E,
    clock: C,
    config: DuelhallConfig,
}

impl<S: Store, E: EphemeralStore, C: Clock> DuelhallBuilder<S, E, C> {
    /// Replaces the wall clock used for row timestamps.
    pub fn clock<C2: Clock>(self, clock: C2) -> DuelhallBuilder<S, E, C2> {
        DuelhallBuilder {
            store: self.store,
            presence: self.presence,
            clock,
            config: self.config,
        }
    }

    pub fn config(mut self, config: DuelhallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sweep(mut self, settings: SweepSettings) -> Self {
        self.config.sweep = settings;
        self
    }

    pub fn registry(mut self, config: duelhall_registry::RegistryConfig) -> Self {
        self.config.registry = config;
        self
    }

    pub fn build(self) -> Duelhall<S, E, C> {
        let lobby =
            Lobby::with_clock(self.store, self.clock).with_config(self.config.lobby.clone());
        Duelhall {
            shared: Arc::new(Shared {
                lobby,
                registry: Registry::new(self.config.registry.clone()),
                presence: self.presence,
                settlements: Mutex::new(Settlements::default()),
                config: self.config,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Duelhall
// ---------------------------------------------------------------------------

struct Shared<S, E, C> {
    lobby: Lobby<S, C>,
    registry: Registry,
    presence: E,
    settlements: Mutex<Settlements>,
    config: DuelhallConfig,
}

/// Rooms whose live session is gone from the registry but whose
/// `finished` write has not landed.
#[derive(Default)]
struct Settlements {
    /// Teardowns under way, by room. Counted, since both sides of a
    /// session may be closing at once.
    in_flight: HashMap<RoomToken, usize>,
    /// Ended games the store refused to finish.
    unfinished: HashSet<RoomToken>,
}

impl Settlements {
    fn enter(&mut self, token: &RoomToken) {
        *self.in_flight.entry(token.clone()).or_default() += 1;
    }

    fn exit(&mut self, token: &RoomToken) {
        if let Some(count) = self.in_flight.get_mut(token) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(token);
            }
        }
    }

    /// Rooms the orphan sweep must leave alone.
    fn guarded(&self) -> impl Iterator<Item = &RoomToken> {
        self.in_flight.keys().chain(self.unfinished.iter())
    }
}

/// The matchmaking service. Cheap to clone; clones share all state.
pub struct Duelhall<S, E, C = SystemClock> {
    shared: Arc<Shared<S, E, C>>,
}

impl<S, E, C> Clone for Duelhall<S, E, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Store, E: EphemeralStore> Duelhall<S, E> {
    pub fn builder(store: S, presence: E) -> DuelhallBuilder<S, E> {
        DuelhallBuilder {
            store,
            presence,
            clock: SystemClock,
            config: DuelhallConfig::default(),
        }
    }

    /// A service with default settings on the system clock.
    pub fn new(store: S, presence: E) -> Self {
        Self::builder(store, presence).build()
    }
}

impl<S: Store, E: EphemeralStore, C: Clock> Duelhall<S, E, C> {
    pub fn lobby(&self) -> &Lobby<S, C> {
        &self.shared.lobby
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub fn config(&self) -> &DuelhallConfig {
        &self.shared.config
    }

    // -----------------------------------------------------------------------
    // Lobby operations
    // -----------------------------------------------------------------------

    pub async fn create_room(
        &self,
        identity: &Identity,
        request: CreateRoom,
    ) -> Result<GameRoom, DuelhallError> {
        Ok(self.lobby().create_room(identity, request).await?)
    }

    pub async fn my_room(&self, identity: &Identity) -> Result<Option<RoomDetails>, DuelhallError> {
        Ok(self.lobby().my_room(identity).await?)
    }

    pub async fn submit_challenge(
        &self,
        identity: &Identity,
        token: &RoomToken,
        nickname: &str,
    ) -> Result<Challenger, DuelhallError> {
        Ok(self.lobby().submit_challenge(identity, token, nickname).await?)
    }

    pub async fn my_request(
        &self,
        identity: &Identity,
    ) -> Result<Option<RequestDetails>, DuelhallError> {
        Ok(self.lobby().my_request(identity).await?)
    }

    pub async fn reply_to_challenge(
        &self,
        identity: &Identity,
        challenger: ChallengerId,
        accept: bool,
    ) -> Result<GameRoom, DuelhallError> {
        Ok(self
            .lobby()
            .reply_to_challenge(identity, challenger, accept)
            .await?)
    }

    pub async fn disable_request(
        &self,
        identity: &Identity,
        challenger: ChallengerId,
    ) -> Result<(), DuelhallError> {
        Ok(self.lobby().disable_request(identity, challenger).await?)
    }

    pub async fn room_by_token(&self, token: &RoomToken) -> Result<RoomSummary, DuelhallError> {
        Ok(self.lobby().room_by_token(token).await?)
    }

    /// The caller's home screen: whether they may open a room or file a
    /// challenge, and the room and request currently in the way.
    pub async fn home(&self, identity: &Identity) -> Result<UserStatus, DuelhallError> {
        Ok(self.lobby().home(identity).await?)
    }

    /// Deletes the caller's room, then closes any live connection bound
    /// to it with [`CloseStatus::RoomDeleted`].
    pub async fn delete_room(
        &self,
        identity: &Identity,
        token: &RoomToken,
    ) -> Result<GameRoom, DuelhallError> {
        let room = self.lobby().delete_room(identity, token).await?;
        self.registry()
            .terminate(token, CloseStatus::RoomDeleted)
            .await;
        Ok(room)
    }

    /// The room `user` last joined live, while the hint has not expired.
    ///
    /// A hint, not a source of truth: it is not cleared when the game
    /// ends, only when its TTL runs out.
    pub async fn presence(&self, user: UserId) -> Result<Option<RoomToken>, DuelhallError> {
        let value = self.shared.presence.get(&presence_key(user)).await?;
        Ok(value.map(RoomToken::new))
    }

    // -----------------------------------------------------------------------
    // Live connections
    // -----------------------------------------------------------------------

    /// Authorizes `identity` for the room behind `token` and registers a
    /// live connection whose events are pushed into `outbox`.
    ///
    /// When this is the second participant, both sides receive
    /// [`LiveEvent::Paired`](duelhall_registry::LiveEvent::Paired) and the
    /// room moves to `in_progress`.
    ///
    /// # Errors
    /// `Unauthorized` if the caller is not the owner or accepted
    /// challenger of a matched or in-progress room, or if the pairing
    /// rules refuse the join.
    pub async fn open_live_connection(
        &self,
        identity: &Identity,
        token: &RoomToken,
        outbox: Outbox,
    ) -> Result<LiveConnection<S, E, C>, DuelhallError> {
        let ticket = self.lobby().authorize_live(identity, token).await?;
        let handle = ConnectionHandle::new(
            *identity,
            ticket.token.clone(),
            ticket.role,
            ticket.opponent,
            outbox,
        );
        let id = handle.id;
        let outcome = self.registry().join(handle).await?;

        let ttl = self.config().presence_ttl;
        if let Err(e) = self
            .shared
            .presence
            .set(&presence_key(ticket.user), ticket.token.to_string(), ttl)
            .await
        {
            debug!(user_id = %ticket.user, error = %e, "presence hint not written");
        }

        if let JoinOutcome::Paired { .. } = outcome {
            if let Err(e) = self.lobby().mark_in_progress(&ticket.token).await {
                // The room moved on between authorization and pairing
                // (deleted, expired). The session must not outlive it.
                let status = match e.kind() {
                    ErrorKind::NotFound => CloseStatus::RoomDeleted,
                    ErrorKind::InvalidState => CloseStatus::Expired,
                    _ => CloseStatus::RelayError,
                };
                warn!(room_token = %ticket.token, error = %e, "pairing abandoned");
                self.registry().terminate(&ticket.token, status).await;
                return Err(e.into());
            }
        }

        info!(
            room_token = %ticket.token,
            user_id = %ticket.user,
            role = ?ticket.role,
            handle = %id,
            "live connection opened"
        );
        Ok(LiveConnection {
            app: self.clone(),
            id,
            token: ticket.token,
            user: ticket.user,
            role: ticket.role,
            opponent: ticket.opponent,
            closed: false,
        })
    }

    /// Removes handle `id` of room `token` and, if that ended a game,
    /// marks the room finished.
    ///
    /// The room is guarded from the orphan sweep from before the handle
    /// leaves the registry until the room is settled.
    async fn conclude(
        &self,
        id: HandleId,
        token: &RoomToken,
        status: CloseStatus,
    ) -> Result<Option<GameRoom>, DuelhallError> {
        self.shared.settlements.lock().await.enter(token);
        let result = match self.registry().leave(id, status).await {
            Some(teardown) => self.settle(&teardown).await,
            None => Ok(None),
        };
        self.shared.settlements.lock().await.exit(token);
        result
    }

    /// Reflects a torn-down session in the lobby. A transient store
    /// failure leaves the room unsettled for the next cleanup pass.
    async fn settle(&self, teardown: &Teardown) -> Result<Option<GameRoom>, DuelhallError> {
        if !teardown.was_live || !ends_game(teardown.status) {
            return Ok(None);
        }
        match self.lobby().finish_game(&teardown.token).await {
            Ok(room) => Ok(Some(room)),
            Err(e) => {
                if e.kind() == ErrorKind::Transient {
                    warn!(room_token = %teardown.token, error = %e, "room left unsettled");
                    self.shared
                        .settlements
                        .lock()
                        .await
                        .unfinished
                        .insert(teardown.token.clone());
                }
                Err(e.into())
            }
        }
    }

    /// Marks every unsettled room finished. Rooms deleted or expired in
    /// the meantime are dropped from the set.
    async fn finish_unsettled(&self) -> Result<usize, LobbyError> {
        let tokens: Vec<RoomToken> = self
            .shared
            .settlements
            .lock()
            .await
            .unfinished
            .iter()
            .cloned()
            .collect();

        let mut finished = 0;
        for token in tokens {
            match self.lobby().finish_game(&token).await {
                Ok(_) => finished += 1,
                Err(e) if e.kind() == ErrorKind::Transient => return Err(e),
                Err(e) => debug!(room_token = %token, error = %e, "unsettled room moved on"),
            }
            self.shared.settlements.lock().await.unfinished.remove(&token);
        }
        Ok(finished)
    }

    // -----------------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------------

    /// Runs one cleanup pass:
    ///
    /// 0. finish rooms whose game ended while the store was failing;
    /// 1. delete open rooms older than `stale_room_max_age`;
    /// 2. expire matched/in-progress rooms without a live connection, and
    ///    close anything that joined them in the meantime;
    /// 3. delete finished/expired rooms past `closed_retention`;
    /// 4. close sessions idle for the registry's `idle_timeout` and mark
    ///    their rooms finished.
    ///
    /// Stops at the first failing step; whatever it did not reach is
    /// picked up by the next pass.
    pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
        let settings = &self.config().sweep;
        let lobby = self.lobby();
        let registry = self.registry();
        let mut report = SweepReport::default();

        report.finished_late = self
            .finish_unsettled()
            .await
            .map_err(step("finish_unsettled"))?;

        report.purged_stale = lobby
            .purge_stale_rooms(settings.stale_room_max_age)
            .await
            .map_err(step("purge_stale_rooms"))?
            .len();

        // Registry first: a teardown enters the guard set before it
        // leaves the registry, so no ended game falls between the two.
        let mut live = registry.live_tokens().await;
        live.extend(self.shared.settlements.lock().await.guarded().cloned());
        let expired = lobby
            .expire_orphaned(settings.orphan_grace, &live)
            .await
            .map_err(step("expire_orphaned"))?;
        for token in &expired {
            registry.terminate(token, CloseStatus::Expired).await;
        }
        report.expired_orphaned = expired.len();

        report.purged_closed = lobby
            .purge_closed_rooms(settings.closed_retention)
            .await
            .map_err(step("purge_closed_rooms"))?
            .len();

        let reaped = registry.reap_idle(registry.config().idle_timeout).await;
        report.reaped_idle = reaped.len();
        // Settle every reaped session; one failure must not strand the rest.
        let mut failed = None;
        for teardown in &reaped {
            if let Err(e) = self.settle(teardown).await {
                if failed.is_none() {
                    failed = Some(SweepError::new("reap_idle", e.kind(), e.to_string()));
                }
            }
        }

        match failed {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Starts the cleanup pass on its own task, every
    /// `sweep.interval`.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let config = SweeperConfig {
            interval: self.config().sweep.interval,
            ..SweeperConfig::default()
        };
        Sweeper::spawn(self.clone(), config)
    }
}

fn step(name: &'static str) -> impl Fn(LobbyError) -> SweepError {
    move |e| SweepError::new(name, e.kind(), e.to_string())
}

impl<S: Store, E: EphemeralStore, C: Clock> SweepJob for Duelhall<S, E, C> {
    async fn sweep(&self) -> Result<SweepReport, SweepError> {
        Duelhall::sweep(self).await
    }
}

// ---------------------------------------------------------------------------
// LiveConnection
// ---------------------------------------------------------------------------

/// The inbound half of a live connection.
///
/// Outbound traffic arrives on the `outbox` passed to
/// [`Duelhall::open_live_connection`]; this is how the connection talks
/// back. Dropping it without [`end`](Self::end) or
/// [`close`](Self::close) counts as a disconnect.
pub struct LiveConnection<S: Store, E: EphemeralStore, C: Clock = SystemClock> {
    app: Duelhall<S, E, C>,
    id: HandleId,
    token: RoomToken,
    user: UserId,
    role: Role,
    opponent: UserId,
    closed: bool,
}

impl<S: Store, E: EphemeralStore, C: Clock> LiveConnection<S, E, C> {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn token(&self) -> &RoomToken {
        &self.token
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn opponent(&self) -> UserId {
        self.opponent
    }

    /// Relays a game payload to the opponent, verbatim.
    ///
    /// If the opponent can no longer be reached the session is closed
    /// for both sides with [`CloseStatus::RelayError`].
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), DuelhallError> {
        match self.app.registry().relay(self.id, payload).await {
            Ok(()) => Ok(()),
            Err(e @ RegistryError::PeerGone(_)) => {
                warn!(room_token = %self.token, handle = %self.id, "relay failed, closing session");
                if let Err(finish) = self
                    .app
                    .conclude(self.id, &self.token, CloseStatus::RelayError)
                    .await
                {
                    warn!(room_token = %self.token, error = %finish, "room not finished");
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ends the game on purpose. Returns the finished room if this call
    /// closed a live session.
    pub async fn end(self) -> Result<Option<GameRoom>, DuelhallError> {
        self.finish(CloseStatus::Finished).await
    }

    /// The connection went away. Returns the finished room if this call
    /// closed a live session.
    pub async fn close(self) -> Result<Option<GameRoom>, DuelhallError> {
        self.finish(CloseStatus::PeerDisconnected).await
    }

    async fn finish(mut self, status: CloseStatus) -> Result<Option<GameRoom>, DuelhallError> {
        self.closed = true;
        self.app.conclude(self.id, &self.token, status).await
    }
}

impl<S: Store, E: EphemeralStore, C: Clock> Drop for LiveConnection<S, E, C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Drop is synchronous; the teardown needs the registry lock and a
        // store transaction, so it runs on its own task.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let app = self.app.clone();
        let id = self.id;
        let token = self.token.clone();
        runtime.spawn(async move {
            if let Err(e) = app.conclude(id, &token, CloseStatus::PeerDisconnected).await {
                warn!(room_token = %token, error = %e, "teardown after drop failed");
            }
        });
    }
}
