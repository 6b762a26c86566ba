//! Integration tests for the in-memory persistent store.

use duelhall_protocol::{RoomToken, UserId};
use duelhall_store::{
    ChallengerStatus, GameState, MemoryStore, NewChallenger, NewRoom, Store, Transaction, User,
};

fn new_room(owner: u64, token: &str) -> NewRoom {
    NewRoom {
        owner: UserId(owner),
        creator_name: format!("user-{owner}"),
        token: RoomToken::new(token),
        theme: Some("classic".into()),
        now: 10,
    }
}

// ---------------------------------------------------------------------------
// Isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_transactions_are_serialized() {
    let store = MemoryStore::new();
    {
        let mut tx = store.begin().await.unwrap();
        tx.put_user(&User::new(UserId(1), 0)).await.unwrap();
        tx.commit().await.unwrap();
    }

    // Each task reads the flag and flips it only if it was clear; with
    // serialized transactions exactly one task can win.
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut tx = store.begin().await.unwrap();
            let mut user = tx.user(UserId(1)).await.unwrap().unwrap();
            if user.has_room {
                return false;
            }
            tokio::task::yield_now().await;
            user.has_room = true;
            tx.put_user(&user).await.unwrap();
            tx.commit().await.unwrap();
            true
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_transaction_reads_its_own_writes() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let room = tx.insert_room(new_room(1, "T1")).await.unwrap();
    let challenger = tx
        .insert_challenger(NewChallenger {
            user: UserId(2),
            room: room.id,
            nickname: "bob".into(),
            now: 11,
        })
        .await
        .unwrap();

    let by_token = tx.room_by_token(&RoomToken::new("T1")).await.unwrap();
    let listed = tx.challengers_for_room(room.id).await.unwrap();

    assert_eq!(by_token.map(|r| r.state), Some(GameState::Created));
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, challenger.id);
    assert_eq!(listed[0].status, ChallengerStatus::Pending);
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_write_fault_mid_cascade_leaves_committed_state_untouched() {
    let store = MemoryStore::new();
    let room_id = {
        let mut tx = store.begin().await.unwrap();
        let room = tx.insert_room(new_room(1, "T1")).await.unwrap();
        for user in 2..5 {
            tx.insert_challenger(NewChallenger {
                user: UserId(user),
                room: room.id,
                nickname: format!("user-{user}"),
                now: 11,
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();
        room.id
    };

    store.fail_nth_write(3, 1);
    let mut tx = store.begin().await.unwrap();
    let mut failed = false;
    for challenger in tx.challengers_for_room(room_id).await.unwrap() {
        if tx.delete_challenger(challenger.id).await.is_err() {
            failed = true;
            break;
        }
    }
    drop(tx);

    assert!(failed);
    assert_eq!(store.challengers(room_id).await.len(), 3);
    assert_eq!(store.room_count().await, 1);
}

#[tokio::test]
async fn test_challengers_by_user_spans_rooms() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let first = tx.insert_room(new_room(1, "T1")).await.unwrap();
    let second = tx.insert_room(new_room(3, "T2")).await.unwrap();
    for room in [first.id, second.id] {
        tx.insert_challenger(NewChallenger {
            user: UserId(2),
            room,
            nickname: "bob".into(),
            now: 12,
        })
        .await
        .unwrap();
    }

    let mine = tx.challengers_by_user(UserId(2)).await.unwrap();
    let rooms: Vec<_> = mine.iter().map(|c| c.room).collect();

    assert_eq!(rooms, vec![first.id, second.id]);
}
