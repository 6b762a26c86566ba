//! In-process [`Store`] implementation.
//!
//! Transactions are serialized behind one async mutex: `begin` takes the
//! lock and clones the committed tables into a private working copy,
//! reads and writes go to the copy, and `commit` swaps it in. Dropping a
//! [`MemoryTx`] releases the lock and throws the copy away, so a
//! transaction that fails halfway leaves no trace.
//!
//! Every transaction, read-only ones included, costs a copy of every
//! table (O(rows)) and excludes all others while open. That suits tests
//! and single-process deployments, not a production backend; a real
//! [`Store`] should map transactions onto the database's own.
//!
//! Fault injection (`fail_nth_write`, `fail_next_begins`,
//! `fail_next_commits`) lets tests abort transactions at chosen points.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use duelhall_protocol::{ChallengerId, RoomId, RoomToken, UserId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Challenger, ChallengerStatus, GameRoom, GameState, NewChallenger, NewRoom, Store,
    StoreError, Transaction, User,
};

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    rooms: BTreeMap<RoomId, GameRoom>,
    challengers: BTreeMap<ChallengerId, Challenger>,
    /// Unique index on `GameRoom::token`.
    tokens: HashMap<RoomToken, RoomId>,
    /// Composite index on `(owner, state)`.
    owner_state: BTreeMap<(UserId, GameState), BTreeSet<RoomId>>,
    next_room: u64,
    next_challenger: u64,
}

impl Tables {
    fn index_room(&mut self, room: &GameRoom) {
        self.owner_state
            .entry((room.owner, room.state))
            .or_default()
            .insert(room.id);
    }

    fn unindex_room(&mut self, room: &GameRoom) {
        let key = (room.owner, room.state);
        if let Some(ids) = self.owner_state.get_mut(&key) {
            ids.remove(&room.id);
            if ids.is_empty() {
                self.owner_state.remove(&key);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Faults {
    /// 1-based write index, within one transaction, that fails.
    nth_write: AtomicUsize,
    /// How many more transactions the write fault applies to.
    write_faults_left: AtomicUsize,
    begin_faults_left: AtomicUsize,
    commit_faults_left: AtomicUsize,
}

/// Decrements `counter` if positive. Returns `true` if it did.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected fault on {what}"))
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// A serializable, in-memory persistent store.
///
/// Cloning shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `nth` write (1-based) of each of the next `times`
    /// transactions fail with [`StoreError::Unavailable`].
    pub fn fail_nth_write(&self, nth: usize, times: usize) {
        self.faults.nth_write.store(nth, Ordering::SeqCst);
        self.faults.write_faults_left.store(times, Ordering::SeqCst);
    }

    /// Makes the next `times` calls to `begin` fail.
    pub fn fail_next_begins(&self, times: usize) {
        self.faults.begin_faults_left.store(times, Ordering::SeqCst);
    }

    /// Makes the next `times` commits fail (and roll back).
    pub fn fail_next_commits(&self, times: usize) {
        self.faults.commit_faults_left.store(times, Ordering::SeqCst);
    }

    // -- committed-state inspection, outside any transaction --

    /// The committed row for `id`.
    pub async fn user(&self, id: UserId) -> Option<User> {
        self.tables.lock().await.users.get(&id).cloned()
    }

    /// The committed room with `token`.
    pub async fn room_by_token(&self, token: &RoomToken) -> Option<GameRoom> {
        let tables = self.tables.lock().await;
        let id = tables.tokens.get(token)?;
        tables.rooms.get(id).cloned()
    }

    /// Committed challenger rows for `room`.
    pub async fn challengers(&self, room: RoomId) -> Vec<Challenger> {
        self.tables
            .lock()
            .await
            .challengers
            .values()
            .filter(|c| c.room == room)
            .cloned()
            .collect()
    }

    /// Number of committed rooms.
    pub async fn room_count(&self) -> usize {
        self.tables.lock().await.rooms.len()
    }

    /// Number of committed challenger rows across all rooms.
    pub async fn challenger_count(&self) -> usize {
        self.tables.lock().await.challengers.len()
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTx;

    /// Waits for the table lock, then clones every table.
    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        if take(&self.faults.begin_faults_left) {
            return Err(injected("begin"));
        }
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();
        let fail_at = if take(&self.faults.write_faults_left) {
            self.faults.nth_write.load(Ordering::SeqCst)
        } else {
            0
        };
        Ok(MemoryTx {
            guard,
            work,
            writes: 0,
            fail_at,
            faults: Arc::clone(&self.faults),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryTx
// ---------------------------------------------------------------------------

/// An open [`MemoryStore`] transaction. Holds the store lock until it is
/// committed or dropped.
#[derive(Debug)]
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    writes: usize,
    /// 0 means no fault armed for this transaction.
    fail_at: usize,
    faults: Arc<Faults>,
}

impl MemoryTx {
    /// Counts a write and fails it if it is the armed one.
    fn write(&mut self, what: &str) -> Result<(), StoreError> {
        self.writes += 1;
        if self.fail_at != 0 && self.writes == self.fail_at {
            tracing::debug!(write = self.writes, what, "injecting store fault");
            return Err(injected(what));
        }
        Ok(())
    }
}

impl Transaction for MemoryTx {
    async fn user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.work.users.get(&id).cloned())
    }

    async fn put_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.write("put_user")?;
        self.work.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn room(&mut self, id: RoomId) -> Result<Option<GameRoom>, StoreError> {
        Ok(self.work.rooms.get(&id).cloned())
    }

    async fn room_by_token(&mut self, token: &RoomToken) -> Result<Option<GameRoom>, StoreError> {
        Ok(self
            .work
            .tokens
            .get(token)
            .and_then(|id| self.work.rooms.get(id))
            .cloned())
    }

    async fn room_by_owner(
        &mut self,
        owner: UserId,
        states: &[GameState],
    ) -> Result<Option<GameRoom>, StoreError> {
        let newest = states
            .iter()
            .filter_map(|state| self.work.owner_state.get(&(owner, *state)))
            .flat_map(|ids| ids.iter().copied())
            .max();
        Ok(newest.and_then(|id| self.work.rooms.get(&id)).cloned())
    }

    async fn rooms_in_states(&mut self, states: &[GameState]) -> Result<Vec<GameRoom>, StoreError> {
        Ok(self
            .work
            .rooms
            .values()
            .filter(|r| states.contains(&r.state))
            .cloned()
            .collect())
    }

    async fn insert_room(&mut self, new: NewRoom) -> Result<GameRoom, StoreError> {
        if self.work.tokens.contains_key(&new.token) {
            return Err(StoreError::Duplicate(format!("room token {}", new.token)));
        }
        self.write("insert_room")?;
        self.work.next_room += 1;
        let room = GameRoom {
            id: RoomId(self.work.next_room),
            owner: new.owner,
            creator_name: new.creator_name,
            state: GameState::Created,
            token: new.token,
            start_time: None,
            finish_time: None,
            theme: new.theme,
            challengers_count: 0,
            created_at: new.now,
            updated_at: new.now,
        };
        self.work.tokens.insert(room.token.clone(), room.id);
        self.work.index_room(&room);
        self.work.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn update_room(&mut self, room: &GameRoom) -> Result<(), StoreError> {
        let previous = self
            .work
            .rooms
            .get(&room.id)
            .cloned()
            .ok_or_else(|| StoreError::Missing(format!("room {}", room.id)))?;
        if previous.token != room.token {
            return Err(StoreError::Duplicate(format!(
                "room token is immutable ({})",
                room.id
            )));
        }
        self.write("update_room")?;
        self.work.unindex_room(&previous);
        self.work.index_room(room);
        self.work.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn delete_room(&mut self, id: RoomId) -> Result<(), StoreError> {
        let room = self
            .work
            .rooms
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::Missing(format!("room {id}")))?;
        self.write("delete_room")?;
        self.work.unindex_room(&room);
        self.work.tokens.remove(&room.token);
        self.work.rooms.remove(&id);
        Ok(())
    }

    async fn challenger(&mut self, id: ChallengerId) -> Result<Option<Challenger>, StoreError> {
        Ok(self.work.challengers.get(&id).cloned())
    }

    async fn challengers_for_room(&mut self, room: RoomId) -> Result<Vec<Challenger>, StoreError> {
        Ok(self
            .work
            .challengers
            .values()
            .filter(|c| c.room == room)
            .cloned()
            .collect())
    }

    async fn challengers_by_user(&mut self, user: UserId) -> Result<Vec<Challenger>, StoreError> {
        Ok(self
            .work
            .challengers
            .values()
            .filter(|c| c.user == user)
            .cloned()
            .collect())
    }

    async fn insert_challenger(&mut self, new: NewChallenger) -> Result<Challenger, StoreError> {
        if !self.work.rooms.contains_key(&new.room) {
            return Err(StoreError::Missing(format!("room {}", new.room)));
        }
        self.write("insert_challenger")?;
        self.work.next_challenger += 1;
        let challenger = Challenger {
            id: ChallengerId(self.work.next_challenger),
            user: new.user,
            room: new.room,
            nickname: new.nickname,
            status: ChallengerStatus::Pending,
            created_at: new.now,
            updated_at: new.now,
        };
        self.work.challengers.insert(challenger.id, challenger.clone());
        Ok(challenger)
    }

    async fn update_challenger(&mut self, challenger: &Challenger) -> Result<(), StoreError> {
        if !self.work.challengers.contains_key(&challenger.id) {
            return Err(StoreError::Missing(format!("challenger {}", challenger.id)));
        }
        self.write("update_challenger")?;
        self.work.challengers.insert(challenger.id, challenger.clone());
        Ok(())
    }

    async fn delete_challenger(&mut self, id: ChallengerId) -> Result<(), StoreError> {
        if !self.work.challengers.contains_key(&id) {
            return Err(StoreError::Missing(format!("challenger {id}")));
        }
        self.write("delete_challenger")?;
        self.work.challengers.remove(&id);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        if take(&self.faults.commit_faults_left) {
            return Err(injected("commit"));
        }
        *self.guard = std::mem::take(&mut self.work);
        Ok(())
    }
}
