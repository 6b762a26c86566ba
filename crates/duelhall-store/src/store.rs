//! The persistent store contract.
//!
//! Every lobby mutation that touches more than one row or flag runs
//! inside one [`Transaction`]. Implementations must give each
//! transaction serializable-enough isolation that two concurrent accepts
//! on the same room cannot both commit, and must discard all writes of a
//! transaction that is dropped without [`Transaction::commit`].

use std::future::Future;

use duelhall_protocol::{ChallengerId, RoomId, RoomToken, UserId};

use crate::{Challenger, GameRoom, GameState, NewChallenger, NewRoom, StoreError, User};

/// A handle to the persistent store. Cheap to share across tasks.
pub trait Store: Send + Sync + 'static {
    /// The transaction type this store hands out.
    type Tx: Transaction;

    /// Opens a transaction. Dropping it without committing rolls back.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;
}

/// Row-level CRUD inside one transaction.
///
/// Reads observe the transaction's own earlier writes. Listing methods
/// return rows ordered by primary key (i.e. insertion order).
pub trait Transaction: Send {
    // -- users --

    fn user(
        &mut self,
        id: UserId,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Inserts or replaces the row keyed by `user.id`.
    fn put_user(&mut self, user: &User) -> impl Future<Output = Result<(), StoreError>> + Send;

    // -- rooms --

    fn room(
        &mut self,
        id: RoomId,
    ) -> impl Future<Output = Result<Option<GameRoom>, StoreError>> + Send;

    fn room_by_token(
        &mut self,
        token: &RoomToken,
    ) -> impl Future<Output = Result<Option<GameRoom>, StoreError>> + Send;

    /// The most recent room owned by `owner` whose state is one of
    /// `states`. Served by the `(owner, state)` index.
    fn room_by_owner(
        &mut self,
        owner: UserId,
        states: &[GameState],
    ) -> impl Future<Output = Result<Option<GameRoom>, StoreError>> + Send;

    /// Every room whose state is one of `states`.
    fn rooms_in_states(
        &mut self,
        states: &[GameState],
    ) -> impl Future<Output = Result<Vec<GameRoom>, StoreError>> + Send;

    /// Inserts a room in [`GameState::Created`].
    ///
    /// Fails with [`StoreError::Duplicate`] if the token is taken.
    fn insert_room(
        &mut self,
        room: NewRoom,
    ) -> impl Future<Output = Result<GameRoom, StoreError>> + Send;

    fn update_room(
        &mut self,
        room: &GameRoom,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_room(&mut self, id: RoomId) -> impl Future<Output = Result<(), StoreError>> + Send;

    // -- challengers --

    fn challenger(
        &mut self,
        id: ChallengerId,
    ) -> impl Future<Output = Result<Option<Challenger>, StoreError>> + Send;

    fn challengers_for_room(
        &mut self,
        room: RoomId,
    ) -> impl Future<Output = Result<Vec<Challenger>, StoreError>> + Send;

    fn challengers_by_user(
        &mut self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<Challenger>, StoreError>> + Send;

    /// Inserts a challenger in [`ChallengerStatus::Pending`](crate::ChallengerStatus::Pending).
    fn insert_challenger(
        &mut self,
        challenger: NewChallenger,
    ) -> impl Future<Output = Result<Challenger, StoreError>> + Send;

    fn update_challenger(
        &mut self,
        challenger: &Challenger,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_challenger(
        &mut self,
        id: ChallengerId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    // -- boundary --

    /// Makes every write of this transaction visible at once.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
