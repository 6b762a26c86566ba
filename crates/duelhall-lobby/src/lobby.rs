//! The room and challenge lifecycle manager.
//!
//! Every operation opens one store transaction, checks its rules
//! against the rows it reads, writes, and commits. If the store reports a
//! transient failure (serialization abort, lost connection) the whole
//! operation is re-run once from a fresh transaction; every other error
//! surfaces immediately and the transaction is dropped, which rolls it
//! back.
//!
//! # Flag ownership
//!
//! `User::has_room` is held by the owner from `create_room` until the
//! room is deleted (by the owner or by `purge_closed_rooms`) or expired
//! by the sweeper. `User::has_request` is held by a challenger while
//! their request is pending, and after acceptance for as long as the room
//! is `matched` or `in_progress`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use duelhall_identity::Identity;
use duelhall_protocol::{ChallengerId, Role, RoomId, RoomToken, UserId};
use duelhall_store::{
    Challenger, ChallengerStatus, GameRoom, GameState, NewChallenger, NewRoom, Store,
    StoreError, Transaction, User,
};
use rand::Rng;

use crate::config::millis;
use crate::{
    Clock, CreateRoom, LiveTicket, LobbyConfig, LobbyError, RequestDetails, RoomDetails,
    RoomSummary, SystemClock, UserStatus,
};

/// States in which a room is still shown to its owner by `my_room`.
const OWNER_VISIBLE: &[GameState] = &[
    GameState::Created,
    GameState::Waiting,
    GameState::Matched,
    GameState::InProgress,
    GameState::Finished,
];

/// Rooms nobody has been accepted into yet.
const OPEN: &[GameState] = &[GameState::Created, GameState::Waiting];

/// Rooms that expect a live session.
const LIVE: &[GameState] = &[GameState::Matched, GameState::InProgress];

/// Rooms whose game is over.
const CLOSED: &[GameState] = &[GameState::Finished, GameState::Expired];

/// Mints a 128-bit random token, hex encoded.
pub fn random_token() -> RoomToken {
    let bytes: [u8; 16] = rand::rng().random();
    RoomToken::new(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

type TokenSource = Arc<dyn Fn() -> RoomToken + Send + Sync>;

/// Owns the room/challenge state machine on top of a [`Store`].
pub struct Lobby<S, C = SystemClock> {
    store: S,
    clock: C,
    config: LobbyConfig,
    mint: TokenSource,
}

impl<S: Store> Lobby<S> {
    /// A lobby on the system clock with default settings.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: Store, C: Clock> Lobby<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            config: LobbyConfig::default(),
            mint: Arc::new(random_token),
        }
    }

    pub fn with_config(mut self, config: LobbyConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the random token generator. Tests use this to force
    /// collisions.
    pub fn with_token_source(
        mut self,
        source: impl Fn() -> RoomToken + Send + Sync + 'static,
    ) -> Self {
        self.mint = Arc::new(source);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    /// Current time on the lobby's clock, unix milliseconds.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    // -----------------------------------------------------------------------
    // Owner operations
    // -----------------------------------------------------------------------

    /// Opens a new room owned by the caller.
    ///
    /// Fails with `Conflict` if the caller already owns an active room.
    pub async fn create_room(
        &self,
        identity: &Identity,
        request: CreateRoom,
    ) -> Result<GameRoom, LobbyError> {
        self.validate_name("creator name", &request.creator_name)?;
        let user = identity.user_id;
        let request = &request;
        let room = self
            .transact("create_room", move || self.create_room_once(user, request))
            .await?;
        tracing::info!(room_token = %room.token, user_id = %user, "room created");
        Ok(room)
    }

    async fn create_room_once(
        &self,
        owner: UserId,
        request: &CreateRoom,
    ) -> Result<GameRoom, LobbyError> {
        let now = self.clock.now_millis();
        let mut tx = self.store.begin().await?;

        let mut user = load_user(&mut tx, owner, now).await?;
        if user.has_room {
            return Err(LobbyError::Conflict(format!(
                "user {owner} already owns an active room"
            )));
        }

        let room = self.insert_with_fresh_token(&mut tx, owner, request, now).await?;

        user.has_room = true;
        user.updated_at = now;
        tx.put_user(&user).await?;
        tx.commit().await?;
        Ok(room)
    }

    /// Inserts the room, regenerating the token on every collision.
    async fn insert_with_fresh_token(
        &self,
        tx: &mut S::Tx,
        owner: UserId,
        request: &CreateRoom,
        now: u64,
    ) -> Result<GameRoom, LobbyError> {
        for attempt in 1..=self.config.token_attempts {
            let token = (self.mint)();
            if tx.room_by_token(&token).await?.is_some() {
                tracing::debug!(attempt, "room token collision, regenerating");
                continue;
            }
            let new = NewRoom {
                owner,
                creator_name: request.creator_name.clone(),
                token,
                theme: request.theme.clone(),
                now,
            };
            match tx.insert_room(new).await {
                Ok(room) => return Ok(room),
                Err(StoreError::Duplicate(_)) => {
                    tracing::debug!(attempt, "room token rejected by store, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LobbyError::Conflict(format!(
            "no unique room token after {} attempts",
            self.config.token_attempts
        )))
    }

    /// Accepts or rejects a pending challenge on the caller's room.
    ///
    /// Accepting rejects every other pending challenger in the same
    /// transaction and moves the room to `matched`.
    pub async fn reply_to_challenge(
        &self,
        identity: &Identity,
        challenger: ChallengerId,
        accept: bool,
    ) -> Result<GameRoom, LobbyError> {
        let owner = identity.user_id;
        let room = self
            .transact("reply_to_challenge", move || {
                self.reply_once(owner, challenger, accept)
            })
            .await?;
        tracing::info!(
            room_token = %room.token,
            challenger = %challenger,
            accept,
            state = %room.state,
            "challenge answered"
        );
        Ok(room)
    }

    async fn reply_once(
        &self,
        owner: UserId,
        challenger_id: ChallengerId,
        accept: bool,
    ) -> Result<GameRoom, LobbyError> {
        let now = self.clock.now_millis();
        let mut tx = self.store.begin().await?;

        let mut challenger = tx
            .challenger(challenger_id)
            .await?
            .ok_or_else(|| LobbyError::NotFound(format!("challenger {challenger_id}")))?;
        let mut room = tx
            .room(challenger.room)
            .await?
            .ok_or_else(|| LobbyError::NotFound(format!("room {}", challenger.room)))?;
        if room.owner != owner {
            return Err(LobbyError::Forbidden(format!(
                "room {} is not owned by {owner}",
                room.token
            )));
        }

        let siblings = tx.challengers_for_room(room.id).await?;
        if siblings
            .iter()
            .any(|c| c.status == ChallengerStatus::Accepted)
        {
            return Err(LobbyError::InvalidState(format!(
                "room {} already has an accepted challenger",
                room.token
            )));
        }
        if !room.state.accepts_challenges() {
            return Err(LobbyError::InvalidState(format!(
                "room {} is {}",
                room.token, room.state
            )));
        }
        if !challenger.status.is_pending() {
            return Err(LobbyError::InvalidState(format!(
                "challenger {challenger_id} is {}",
                challenger.status
            )));
        }

        if accept {
            challenger.status = ChallengerStatus::Accepted;
            challenger.updated_at = now;
            tx.update_challenger(&challenger).await?;

            for mut rival in siblings
                .into_iter()
                .filter(|c| c.id != challenger.id && c.status.is_pending())
            {
                rival.status = ChallengerStatus::Rejected;
                rival.updated_at = now;
                tx.update_challenger(&rival).await?;
                release_request(&mut tx, rival.user, now).await?;
            }

            room.state = GameState::Matched;
            room.start_time = Some(now);
            room.updated_at = now;
            tx.update_room(&room).await?;
        } else {
            challenger.status = ChallengerStatus::Rejected;
            challenger.updated_at = now;
            tx.update_challenger(&challenger).await?;
            release_request(&mut tx, challenger.user, now).await?;
        }

        tx.commit().await?;
        Ok(room)
    }

    /// Deletes the caller's room with every challenger row, releasing all
    /// flags the room held. Allowed in any state.
    pub async fn delete_room(
        &self,
        identity: &Identity,
        token: &RoomToken,
    ) -> Result<GameRoom, LobbyError> {
        let owner = identity.user_id;
        let room = self
            .transact("delete_room", move || self.delete_room_once(owner, token))
            .await?;
        tracing::info!(room_token = %token, user_id = %owner, "room deleted");
        Ok(room)
    }

    async fn delete_room_once(
        &self,
        owner: UserId,
        token: &RoomToken,
    ) -> Result<GameRoom, LobbyError> {
        let now = self.clock.now_millis();
        let mut tx = self.store.begin().await?;

        let room = tx
            .room_by_token(token)
            .await?
            .ok_or_else(|| LobbyError::NotFound(format!("room {token}")))?;
        if room.owner != owner {
            return Err(LobbyError::Forbidden(format!(
                "room {token} is not owned by {owner}"
            )));
        }

        cascade_delete(&mut tx, &room, now).await?;
        tx.commit().await?;
        Ok(room)
    }

    // -----------------------------------------------------------------------
    // Challenger operations
    // -----------------------------------------------------------------------

    /// Files a pending challenge against the room behind `token`.
    pub async fn submit_challenge(
        &self,
        identity: &Identity,
        token: &RoomToken,
        nickname: &str,
    ) -> Result<Challenger, LobbyError> {
        self.validate_name("nickname", nickname)?;
        let user = identity.user_id;
        let challenger = self
            .transact("submit_challenge", move || {
                self.submit_once(user, token, nickname)
            })
            .await?;
        tracing::info!(
            room_token = %token,
            user_id = %user,
            challenger = %challenger.id,
            "challenge submitted"
        );
        Ok(challenger)
    }

    async fn submit_once(
        &self,
        user_id: UserId,
        token: &RoomToken,
        nickname: &str,
    ) -> Result<Challenger, LobbyError> {
        let now = self.clock.now_millis();
        let mut tx = self.store.begin().await?;

        let mut room = tx
            .room_by_token(token)
            .await?
            .ok_or_else(|| LobbyError::NotFound(format!("room {token}")))?;
        if room.owner == user_id {
            return Err(LobbyError::SelfChallenge);
        }

        let mut user = load_user(&mut tx, user_id, now).await?;
        if user.has_request {
            return Err(LobbyError::Conflict(format!(
                "user {user_id} already has an outstanding challenge"
            )));
        }
        if !room.state.accepts_challenges() {
            return Err(LobbyError::Conflict(format!(
                "room {token} is {} and takes no challenges",
                room.state
            )));
        }

        let challenger = tx
            .insert_challenger(NewChallenger {
                user: user_id,
                room: room.id,
                nickname: nickname.to_string(),
                now,
            })
            .await?;

        room.challengers_count += 1;
        if room.state == GameState::Created {
            room.state = GameState::Waiting;
        }
        room.updated_at = now;
        tx.update_room(&room).await?;

        user.has_request = true;
        user.updated_at = now;
        tx.put_user(&user).await?;

        tx.commit().await?;
        Ok(challenger)
    }

    /// Withdraws the caller's own pending challenge.
    pub async fn disable_request(
        &self,
        identity: &Identity,
        challenger: ChallengerId,
    ) -> Result<(), LobbyError> {
        let user = identity.user_id;
        self.transact("disable_request", move || {
            self.disable_once(user, challenger)
        })
        .await?;
        tracing::info!(user_id = %user, challenger = %challenger, "challenge withdrawn");
        Ok(())
    }

    async fn disable_once(
        &self,
        user: UserId,
        challenger_id: ChallengerId,
    ) -> Result<(), LobbyError> {
        let now = self.clock.now_millis();
        let mut tx = self.store.begin().await?;

        let challenger = tx
            .challenger(challenger_id)
            .await?
            .ok_or_else(|| LobbyError::NotFound(format!("challenger {challenger_id}")))?;
        if challenger.user != user {
            return Err(LobbyError::Forbidden(format!(
                "challenger {challenger_id} belongs to another user"
            )));
        }
        if !challenger.status.is_pending() {
            return Err(LobbyError::InvalidState(format!(
                "challenger {challenger_id} is {}",
                challenger.status
            )));
        }

        release_request(&mut tx, user, now).await?;
        tx.delete_challenger(challenger.id).await?;

        if let Some(mut room) = tx.room(challenger.room).await? {
            room.challengers_count = room.challengers_count.saturating_sub(1);
            room.updated_at = now;
            tx.update_room(&room).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The caller's current room with its challengers, if any.
    pub async fn my_room(&self, identity: &Identity) -> Result<Option<RoomDetails>, LobbyError> {
        let owner = identity.user_id;
        self.transact("my_room", move || self.my_room_once(owner))
            .await
    }

    async fn my_room_once(&self, owner: UserId) -> Result<Option<RoomDetails>, LobbyError> {
        let mut tx = self.store.begin().await?;
        let Some(room) = tx.room_by_owner(owner, OWNER_VISIBLE).await? else {
            return Ok(None);
        };
        let challengers = tx.challengers_for_room(room.id).await?;
        Ok(Some(RoomDetails { room, challengers }))
    }

    /// The caller's outstanding challenge, if any: a pending request, or
    /// an accepted one whose game has not ended.
    pub async fn my_request(
        &self,
        identity: &Identity,
    ) -> Result<Option<RequestDetails>, LobbyError> {
        let user = identity.user_id;
        self.transact("my_request", move || self.my_request_once(user))
            .await
    }

    async fn my_request_once(&self, user: UserId) -> Result<Option<RequestDetails>, LobbyError> {
        let mut tx = self.store.begin().await?;
        let request = outstanding_request(&mut tx, user).await?;
        Ok(request.map(|(challenger, room)| RequestDetails {
            room: RoomSummary::from(&room),
            challenger,
        }))
    }

    /// The caller's flags together with the room and request behind them,
    /// read in one transaction. A user with no row yet gets both flags
    /// clear.
    pub async fn home(&self, identity: &Identity) -> Result<UserStatus, LobbyError> {
        let user = identity.user_id;
        self.transact("home", move || self.home_once(user)).await
    }

    async fn home_once(&self, id: UserId) -> Result<UserStatus, LobbyError> {
        let mut tx = self.store.begin().await?;
        let (has_room, has_request) = match tx.user(id).await? {
            Some(user) => (user.has_room, user.has_request),
            None => (false, false),
        };
        let room = tx.room_by_owner(id, OWNER_VISIBLE).await?;
        let request = outstanding_request(&mut tx, id).await?;
        Ok(UserStatus {
            user: id,
            has_room,
            has_request,
            room: room.as_ref().map(RoomSummary::from),
            request: request.map(|(_, room)| RoomSummary::from(&room)),
        })
    }

    /// The public view of the room behind `token`.
    pub async fn room_by_token(&self, token: &RoomToken) -> Result<RoomSummary, LobbyError> {
        let room = self
            .transact("room_by_token", move || self.find_room_once(token))
            .await?;
        Ok(RoomSummary::from(&room))
    }

    async fn find_room_once(&self, token: &RoomToken) -> Result<GameRoom, LobbyError> {
        let mut tx = self.store.begin().await?;
        find_room(&mut tx, token).await
    }

    // -----------------------------------------------------------------------
    // Live-session hooks
    // -----------------------------------------------------------------------

    /// Checks that the caller is one of the two parties of a matched room.
    ///
    /// Every failure, including an unknown token, is `Unauthorized` so
    /// the live endpoint reveals nothing about rooms the caller cannot
    /// join.
    pub async fn authorize_live(
        &self,
        identity: &Identity,
        token: &RoomToken,
    ) -> Result<LiveTicket, LobbyError> {
        let user = identity.user_id;
        self.transact("authorize_live", move || self.authorize_once(user, token))
            .await
    }

    async fn authorize_once(
        &self,
        user: UserId,
        token: &RoomToken,
    ) -> Result<LiveTicket, LobbyError> {
        let deny = || LobbyError::Unauthorized(token.clone());
        let mut tx = self.store.begin().await?;

        let room = tx.room_by_token(token).await?.ok_or_else(deny)?;
        if !room.state.allows_live() {
            return Err(deny());
        }
        let accepted = tx
            .challengers_for_room(room.id)
            .await?
            .into_iter()
            .find(|c| c.status == ChallengerStatus::Accepted)
            .ok_or_else(deny)?;

        let (role, opponent) = if user == room.owner {
            (Role::Owner, accepted.user)
        } else if user == accepted.user {
            (Role::Challenger, room.owner)
        } else {
            return Err(deny());
        };

        Ok(LiveTicket {
            room_id: room.id,
            token: room.token,
            user,
            role,
            opponent,
        })
    }

    /// Moves a matched room to `in_progress` once both parties are live.
    /// A room already in progress is left as is.
    pub async fn mark_in_progress(&self, token: &RoomToken) -> Result<GameRoom, LobbyError> {
        let room = self
            .transact("mark_in_progress", move || self.start_once(token))
            .await?;
        tracing::info!(room_token = %token, "game in progress");
        Ok(room)
    }

    async fn start_once(&self, token: &RoomToken) -> Result<GameRoom, LobbyError> {
        let now = self.clock.now_millis();
        let mut tx = self.store.begin().await?;
        let mut room = find_room(&mut tx, token).await?;
        match room.state {
            GameState::InProgress => return Ok(room),
            GameState::Matched => {}
            other => {
                return Err(LobbyError::InvalidState(format!("room {token} is {other}")));
            }
        }
        room.state = GameState::InProgress;
        room.updated_at = now;
        tx.update_room(&room).await?;
        tx.commit().await?;
        Ok(room)
    }

    /// Ends the game: room `finished` with `finish_time` set, and the
    /// accepted challenger's request flag released. Idempotent.
    pub async fn finish_game(&self, token: &RoomToken) -> Result<GameRoom, LobbyError> {
        let room = self
            .transact("finish_game", move || self.finish_once(token))
            .await?;
        tracing::info!(room_token = %token, finish_time = ?room.finish_time, "game finished");
        Ok(room)
    }

    async fn finish_once(&self, token: &RoomToken) -> Result<GameRoom, LobbyError> {
        let now = self.clock.now_millis();
        let mut tx = self.store.begin().await?;
        let mut room = find_room(&mut tx, token).await?;
        match room.state {
            GameState::Finished => return Ok(room),
            GameState::Matched | GameState::InProgress => {}
            other => {
                return Err(LobbyError::InvalidState(format!("room {token} is {other}")));
            }
        }

        room.state = GameState::Finished;
        room.finish_time = Some(now);
        room.updated_at = now;
        tx.update_room(&room).await?;

        for challenger in tx.challengers_for_room(room.id).await? {
            if challenger.status == ChallengerStatus::Accepted {
                release_request(&mut tx, challenger.user, now).await?;
            }
        }

        tx.commit().await?;
        Ok(room)
    }

    // -----------------------------------------------------------------------
    // Sweeper hooks
    //
    // Each scans candidates in one read transaction, then handles every
    // room in its own transaction, re-checking the condition so a room
    // that moved on in between is left alone. The first failure aborts
    // the pass; the remaining rooms are picked up on the next one.
    // -----------------------------------------------------------------------

    /// Deletes `created`/`waiting` rooms created more than `max_age` ago,
    /// with the same cascade as [`delete_room`](Self::delete_room).
    pub async fn purge_stale_rooms(&self, max_age: Duration) -> Result<Vec<RoomToken>, LobbyError> {
        let cutoff = self.clock.now_millis().saturating_sub(millis(max_age));
        self.purge_rooms("purge_stale_rooms", OPEN, cutoff, |r| r.created_at)
            .await
    }

    /// Deletes `finished`/`expired` rooms last touched more than
    /// `retention` ago, so a finished room stops pinning its owner's
    /// `has_room` flag.
    pub async fn purge_closed_rooms(
        &self,
        retention: Duration,
    ) -> Result<Vec<RoomToken>, LobbyError> {
        let cutoff = self.clock.now_millis().saturating_sub(millis(retention));
        self.purge_rooms("purge_closed_rooms", CLOSED, cutoff, |r| r.updated_at)
            .await
    }

    async fn purge_rooms(
        &self,
        op: &'static str,
        states: &'static [GameState],
        cutoff: u64,
        stamp: fn(&GameRoom) -> u64,
    ) -> Result<Vec<RoomToken>, LobbyError> {
        let candidates = self.transact(op, move || self.rooms_in(states)).await?;
        let mut purged = Vec::new();
        for room in candidates.into_iter().filter(|r| stamp(r) < cutoff) {
            let id = room.id;
            let deleted = self
                .transact(op, move || self.purge_once(id, states, cutoff, stamp))
                .await?;
            if deleted {
                tracing::info!(room_token = %room.token, state = %room.state, op, "room purged");
                purged.push(room.token);
            }
        }
        Ok(purged)
    }

    async fn purge_once(
        &self,
        id: RoomId,
        states: &[GameState],
        cutoff: u64,
        stamp: fn(&GameRoom) -> u64,
    ) -> Result<bool, LobbyError> {
        let now = self.clock.now_millis();
        let mut tx = self.store.begin().await?;
        let Some(room) = tx.room(id).await? else {
            return Ok(false);
        };
        if !states.contains(&room.state) || stamp(&room) >= cutoff {
            return Ok(false);
        }
        cascade_delete(&mut tx, &room, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Expires `matched`/`in_progress` rooms untouched for `grace` whose
    /// token is not in `live_tokens`. The owner's `has_room` and the
    /// accepted challenger's `has_request` are released.
    pub async fn expire_orphaned(
        &self,
        grace: Duration,
        live_tokens: &HashSet<RoomToken>,
    ) -> Result<Vec<RoomToken>, LobbyError> {
        let cutoff = self.clock.now_millis().saturating_sub(millis(grace));
        let candidates = self
            .transact("expire_orphaned", move || self.rooms_in(LIVE))
            .await?;

        let mut expired = Vec::new();
        for room in candidates
            .into_iter()
            .filter(|r| r.updated_at < cutoff && !live_tokens.contains(&r.token))
        {
            let id = room.id;
            let done = self
                .transact("expire_orphaned", move || self.expire_once(id, cutoff))
                .await?;
            if done {
                tracing::info!(room_token = %room.token, state = %room.state, "orphaned room expired");
                expired.push(room.token);
            }
        }
        Ok(expired)
    }

    async fn expire_once(&self, id: RoomId, cutoff: u64) -> Result<bool, LobbyError> {
        let now = self.clock.now_millis();
        let mut tx = self.store.begin().await?;
        let Some(mut room) = tx.room(id).await? else {
            return Ok(false);
        };
        if !LIVE.contains(&room.state) || room.updated_at >= cutoff {
            return Ok(false);
        }

        room.state = GameState::Expired;
        room.updated_at = now;
        tx.update_room(&room).await?;
        release_room(&mut tx, room.owner, now).await?;

        for mut challenger in tx.challengers_for_room(room.id).await? {
            if matches!(
                challenger.status,
                ChallengerStatus::Accepted | ChallengerStatus::Pending
            ) {
                challenger.status = ChallengerStatus::Expired;
                challenger.updated_at = now;
                tx.update_challenger(&challenger).await?;
                release_request(&mut tx, challenger.user, now).await?;
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    async fn rooms_in(&self, states: &[GameState]) -> Result<Vec<GameRoom>, LobbyError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.rooms_in_states(states).await?)
    }

    /// Runs `attempt`, and runs it once more if it failed transiently.
    async fn transact<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, LobbyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LobbyError>>,
    {
        match attempt().await {
            Err(e) if e.is_transient() => {
                tracing::debug!(op, error = %e, "transient store failure, retrying");
                attempt().await
            }
            other => other,
        }
    }

    fn validate_name(&self, field: &str, value: &str) -> Result<(), LobbyError> {
        if value.trim().is_empty() {
            return Err(LobbyError::InvalidInput(format!("{field} is empty")));
        }
        if value.chars().count() > self.config.max_name_len {
            return Err(LobbyError::InvalidInput(format!(
                "{field} is longer than {} characters",
                self.config.max_name_len
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Returns `true` if `challenger` is what keeps its user's `has_request`
/// set, given its room's state.
fn holds_request(challenger: &Challenger, room_state: GameState) -> bool {
    match challenger.status {
        ChallengerStatus::Pending => true,
        ChallengerStatus::Accepted => room_state.allows_live(),
        ChallengerStatus::Rejected | ChallengerStatus::Expired => false,
    }
}

async fn find_room<T: Transaction>(tx: &mut T, token: &RoomToken) -> Result<GameRoom, LobbyError> {
    tx.room_by_token(token)
        .await?
        .ok_or_else(|| LobbyError::NotFound(format!("room {token}")))
}

/// The user's newest challenge that still holds their request flag, with
/// its room.
async fn outstanding_request<T: Transaction>(
    tx: &mut T,
    user: UserId,
) -> Result<Option<(Challenger, GameRoom)>, LobbyError> {
    let mine = tx.challengers_by_user(user).await?;
    // Newest first.
    for challenger in mine.into_iter().rev() {
        let Some(room) = tx.room(challenger.room).await? else {
            continue;
        };
        if holds_request(&challenger, room.state) {
            return Ok(Some((challenger, room)));
        }
    }
    Ok(None)
}

/// The user's row, or a fresh unsaved one for a first-time user.
async fn load_user<T: Transaction>(tx: &mut T, id: UserId, now: u64) -> Result<User, LobbyError> {
    Ok(tx.user(id).await?.unwrap_or_else(|| User::new(id, now)))
}

async fn release_request<T: Transaction>(
    tx: &mut T,
    id: UserId,
    now: u64,
) -> Result<(), LobbyError> {
    if let Some(mut user) = tx.user(id).await? {
        if user.has_request {
            user.has_request = false;
            user.updated_at = now;
            tx.put_user(&user).await?;
        }
    }
    Ok(())
}

async fn release_room<T: Transaction>(tx: &mut T, id: UserId, now: u64) -> Result<(), LobbyError> {
    if let Some(mut user) = tx.user(id).await? {
        if user.has_room {
            user.has_room = false;
            user.updated_at = now;
            tx.put_user(&user).await?;
        }
    }
    Ok(())
}

/// Deletes `room` and all its challengers, releasing every flag the room
/// still holds. An expired room already gave its owner flag back, and
/// the owner may hold it again for a newer room.
async fn cascade_delete<T: Transaction>(
    tx: &mut T,
    room: &GameRoom,
    now: u64,
) -> Result<(), LobbyError> {
    for challenger in tx.challengers_for_room(room.id).await? {
        if holds_request(&challenger, room.state) {
            release_request(tx, challenger.user, now).await?;
        }
        tx.delete_challenger(challenger.id).await?;
    }
    if room.state != GameState::Expired {
        release_room(tx, room.owner, now).await?;
    }
    tx.delete_room(room.id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use duelhall_store::MemoryStore;

    fn challenger(status: ChallengerStatus) -> Challenger {
        Challenger {
            id: ChallengerId(1),
            user: UserId(2),
            room: RoomId(1),
            nickname: "bob".into(),
            status,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_random_token_is_32_hex_chars() {
        let token = random_token();
        assert_eq!(token.as_str().len(), 32);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(random_token(), token);
    }

    #[test]
    fn test_holds_request_accepted_only_while_live() {
        let accepted = challenger(ChallengerStatus::Accepted);
        assert!(holds_request(&accepted, GameState::Matched));
        assert!(holds_request(&accepted, GameState::InProgress));
        assert!(!holds_request(&accepted, GameState::Finished));
        assert!(holds_request(&challenger(ChallengerStatus::Pending), GameState::Waiting));
        assert!(!holds_request(&challenger(ChallengerStatus::Rejected), GameState::Waiting));
    }

    #[test]
    fn test_validate_name_rejects_blank_and_oversized() {
        let lobby = Lobby::new(MemoryStore::new());
        assert!(lobby.validate_name("nickname", "bob").is_ok());
        assert!(matches!(
            lobby.validate_name("nickname", "   "),
            Err(LobbyError::InvalidInput(_))
        ));
        let long = "x".repeat(lobby.config().max_name_len + 1);
        assert!(matches!(
            lobby.validate_name("nickname", &long),
            Err(LobbyError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_transact_retries_transient_failure_once() {
        let lobby = Lobby::new(MemoryStore::new());
        lobby.store().fail_next_begins(1);

        let room = lobby.room_by_token(&RoomToken::new("nope")).await;

        // The retry got through to the store and found nothing.
        assert!(matches!(room, Err(LobbyError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transact_gives_up_after_second_transient_failure() {
        let lobby = Lobby::new(MemoryStore::new());
        lobby.store().fail_next_begins(2);

        let room = lobby.room_by_token(&RoomToken::new("nope")).await;

        assert!(room.unwrap_err().is_transient());
    }
}
