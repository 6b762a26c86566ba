//! Integration tests for the room and challenge lifecycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use duelhall_identity::Identity;
use duelhall_lobby::{CreateRoom, Lobby, LobbyError, ManualClock};
use duelhall_protocol::{ChallengerId, ErrorKind, Role, RoomToken, UserId};
use duelhall_store::{ChallengerStatus, GameRoom, GameState, MemoryStore};

// =========================================================================
// Helpers
// =========================================================================

const START: u64 = 1_700_000_000_000;

fn setup() -> (Lobby<MemoryStore, ManualClock>, ManualClock) {
    let clock = ManualClock::new(START);
    (Lobby::with_clock(MemoryStore::new(), clock.clone()), clock)
}

fn user(id: u64) -> Identity {
    Identity::new(UserId(id))
}

fn new_room(name: &str) -> CreateRoom {
    CreateRoom {
        creator_name: name.into(),
        theme: None,
    }
}

async fn open_room(lobby: &Lobby<MemoryStore, ManualClock>, owner: u64) -> GameRoom {
    lobby
        .create_room(&user(owner), new_room(&format!("owner-{owner}")))
        .await
        .unwrap()
}

async fn flags(lobby: &Lobby<MemoryStore, ManualClock>, id: u64) -> (bool, bool) {
    lobby
        .store()
        .user(UserId(id))
        .await
        .map(|u| (u.has_room, u.has_request))
        .unwrap_or((false, false))
}

/// Owner 1 opens a room, users 2 and 3 challenge it, the owner accepts 2.
async fn matched_room(lobby: &Lobby<MemoryStore, ManualClock>) -> (GameRoom, ChallengerId) {
    let room = open_room(lobby, 1).await;
    let a = lobby
        .submit_challenge(&user(2), &room.token, "alice")
        .await
        .unwrap();
    lobby
        .submit_challenge(&user(3), &room.token, "bob")
        .await
        .unwrap();
    let room = lobby.reply_to_challenge(&user(1), a.id, true).await.unwrap();
    (room, a.id)
}

// =========================================================================
// create_room / delete_room
// =========================================================================

#[tokio::test]
async fn test_create_room_sets_has_room_and_created_state() {
    let (lobby, _) = setup();

    let room = lobby
        .create_room(
            &user(1),
            CreateRoom {
                creator_name: "ada".into(),
                theme: Some("forest".into()),
            },
        )
        .await
        .unwrap();

    assert_eq!(room.state, GameState::Created);
    assert_eq!(room.owner, UserId(1));
    assert_eq!(room.theme.as_deref(), Some("forest"));
    assert_eq!(room.challengers_count, 0);
    assert_eq!(room.created_at, START);
    assert_eq!(flags(&lobby, 1).await, (true, false));
}

#[tokio::test]
async fn test_create_room_twice_conflicts_until_deleted() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;

    let second = lobby.create_room(&user(1), new_room("again")).await;
    assert_eq!(second.unwrap_err().kind(), ErrorKind::Conflict);

    lobby.delete_room(&user(1), &room.token).await.unwrap();
    assert_eq!(flags(&lobby, 1).await, (false, false));

    let third = lobby.create_room(&user(1), new_room("again")).await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn test_create_room_blank_name_rejected() {
    let (lobby, _) = setup();
    let result = lobby.create_room(&user(1), new_room("  ")).await;
    assert!(matches!(result, Err(LobbyError::InvalidInput(_))));
    assert_eq!(lobby.store().room_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_room_concurrent_users_get_distinct_tokens() {
    let lobby = Arc::new(Lobby::new(MemoryStore::new()));

    let mut tasks = Vec::new();
    for id in 1..=32 {
        let lobby = Arc::clone(&lobby);
        tasks.push(tokio::spawn(async move {
            lobby
                .create_room(&user(id), new_room("racer"))
                .await
                .unwrap()
                .token
        }));
    }

    let mut tokens = HashSet::new();
    for task in tasks {
        tokens.insert(task.await.unwrap());
    }
    assert_eq!(tokens.len(), 32);
}

#[tokio::test]
async fn test_create_room_token_collision_regenerates() {
    let (lobby, _) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let lobby = lobby.with_token_source(move || {
        // "dup", "dup", then fresh tokens.
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            RoomToken::new("dup")
        } else {
            RoomToken::new(format!("fresh-{n}"))
        }
    });

    let first = open_room(&lobby, 1).await;
    let second = open_room(&lobby, 2).await;

    assert_eq!(first.token, RoomToken::new("dup"));
    assert_eq!(second.token, RoomToken::new("fresh-2"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_delete_room_by_non_owner_is_forbidden() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;

    let result = lobby.delete_room(&user(2), &room.token).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    assert_eq!(lobby.store().room_count().await, 1);
}

#[tokio::test]
async fn test_delete_room_unknown_token_is_not_found() {
    let (lobby, _) = setup();
    let result = lobby.delete_room(&user(1), &RoomToken::new("nope")).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_delete_room_cascade_releases_every_flag() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;
    for id in 2..=4 {
        lobby
            .submit_challenge(&user(id), &room.token, "x")
            .await
            .unwrap();
    }

    lobby.delete_room(&user(1), &room.token).await.unwrap();

    assert_eq!(lobby.store().room_count().await, 0);
    assert_eq!(lobby.store().challenger_count().await, 0);
    for id in 1..=4 {
        assert_eq!(flags(&lobby, id).await, (false, false), "user {id}");
    }
}

#[tokio::test]
async fn test_delete_room_injected_fault_leaves_everything_in_place() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;
    for id in 2..=4 {
        lobby
            .submit_challenge(&user(id), &room.token, "x")
            .await
            .unwrap();
    }

    // Fail the fourth write of both the attempt and its retry, midway
    // through the challenger cascade.
    lobby.store().fail_nth_write(4, 2);
    let result = lobby.delete_room(&user(1), &room.token).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Transient);
    assert_eq!(lobby.store().room_count().await, 1);
    assert_eq!(lobby.store().challengers(room.id).await.len(), 3);
    assert_eq!(flags(&lobby, 1).await, (true, false));
    for id in 2..=4 {
        assert_eq!(flags(&lobby, id).await, (false, true), "user {id}");
    }
}

#[tokio::test]
async fn test_delete_room_single_transient_fault_is_retried() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;

    lobby.store().fail_next_commits(1);
    lobby.delete_room(&user(1), &room.token).await.unwrap();

    assert_eq!(lobby.store().room_count().await, 0);
}

// =========================================================================
// submit_challenge / disable_request
// =========================================================================

#[tokio::test]
async fn test_submit_challenge_first_moves_room_to_waiting() {
    let (lobby, clock) = setup();
    let room = open_room(&lobby, 1).await;
    clock.advance(Duration::from_secs(1));

    let challenger = lobby
        .submit_challenge(&user(2), &room.token, "alice")
        .await
        .unwrap();

    assert_eq!(challenger.status, ChallengerStatus::Pending);
    assert_eq!(challenger.nickname, "alice");
    let summary = lobby.room_by_token(&room.token).await.unwrap();
    assert_eq!(summary.state, GameState::Waiting);
    assert_eq!(summary.challengers_count, 1);
    assert_eq!(flags(&lobby, 2).await, (false, true));
}

#[tokio::test]
async fn test_submit_challenge_own_room_is_self_challenge() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;

    let result = lobby.submit_challenge(&user(1), &room.token, "me").await;

    assert!(matches!(result, Err(LobbyError::SelfChallenge)));
}

#[tokio::test]
async fn test_submit_challenge_unknown_token_is_not_found() {
    let (lobby, _) = setup();
    let result = lobby
        .submit_challenge(&user(2), &RoomToken::new("nope"), "x")
        .await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_submit_challenge_second_outstanding_conflicts() {
    let (lobby, _) = setup();
    let first = open_room(&lobby, 1).await;
    let second = open_room(&lobby, 3).await;
    lobby
        .submit_challenge(&user(2), &first.token, "x")
        .await
        .unwrap();

    let result = lobby.submit_challenge(&user(2), &second.token, "x").await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_submit_challenge_matched_room_conflicts() {
    let (lobby, _) = setup();
    let (room, _) = matched_room(&lobby).await;

    let result = lobby.submit_challenge(&user(9), &room.token, "late").await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_disable_request_withdraws_and_decrements() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;
    let c = lobby
        .submit_challenge(&user(2), &room.token, "x")
        .await
        .unwrap();

    lobby.disable_request(&user(2), c.id).await.unwrap();

    assert_eq!(flags(&lobby, 2).await, (false, false));
    assert_eq!(lobby.room_by_token(&room.token).await.unwrap().challengers_count, 0);
    assert!(lobby.my_request(&user(2)).await.unwrap().is_none());
    // Free to challenge again.
    assert!(lobby.submit_challenge(&user(2), &room.token, "x").await.is_ok());
}

#[tokio::test]
async fn test_disable_request_of_another_user_is_forbidden() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;
    let c = lobby
        .submit_challenge(&user(2), &room.token, "x")
        .await
        .unwrap();

    let result = lobby.disable_request(&user(3), c.id).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_disable_request_after_accept_is_invalid_state() {
    let (lobby, _) = setup();
    let (_, accepted) = matched_room(&lobby).await;

    let result = lobby.disable_request(&user(2), accepted).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidState);
}

// =========================================================================
// reply_to_challenge
// =========================================================================

#[tokio::test]
async fn test_reply_accept_rejects_rivals_and_matches_room() {
    let (lobby, clock) = setup();
    let room = open_room(&lobby, 1).await;
    let a = lobby
        .submit_challenge(&user(2), &room.token, "alice")
        .await
        .unwrap();
    let b = lobby
        .submit_challenge(&user(3), &room.token, "bob")
        .await
        .unwrap();
    clock.advance(Duration::from_secs(5));

    let matched = lobby.reply_to_challenge(&user(1), a.id, true).await.unwrap();

    assert_eq!(matched.state, GameState::Matched);
    assert_eq!(matched.start_time, Some(START + 5_000));
    let rows = lobby.store().challengers(room.id).await;
    let status = |id| rows.iter().find(|c| c.id == id).map(|c| c.status);
    assert_eq!(status(a.id), Some(ChallengerStatus::Accepted));
    assert_eq!(status(b.id), Some(ChallengerStatus::Rejected));
    assert_eq!(flags(&lobby, 2).await, (false, true));
    assert_eq!(flags(&lobby, 3).await, (false, false));
}

#[tokio::test]
async fn test_reply_reject_keeps_room_state() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;
    let a = lobby
        .submit_challenge(&user(2), &room.token, "alice")
        .await
        .unwrap();

    let after = lobby.reply_to_challenge(&user(1), a.id, false).await.unwrap();

    assert_eq!(after.state, GameState::Waiting);
    assert_eq!(flags(&lobby, 2).await, (false, false));
}

#[tokio::test]
async fn test_reply_second_accept_is_invalid_state() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;
    let a = lobby
        .submit_challenge(&user(2), &room.token, "a")
        .await
        .unwrap();
    let b = lobby
        .submit_challenge(&user(3), &room.token, "b")
        .await
        .unwrap();
    lobby.reply_to_challenge(&user(1), a.id, true).await.unwrap();

    let result = lobby.reply_to_challenge(&user(1), b.id, true).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_reply_by_non_owner_is_forbidden() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;
    let a = lobby
        .submit_challenge(&user(2), &room.token, "a")
        .await
        .unwrap();

    let result = lobby.reply_to_challenge(&user(2), a.id, true).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_reply_unknown_challenger_is_not_found() {
    let (lobby, _) = setup();
    let result = lobby
        .reply_to_challenge(&user(1), ChallengerId(99), true)
        .await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reply_concurrent_accepts_at_most_one_wins() {
    let lobby = Arc::new(Lobby::new(MemoryStore::new()));
    let room = lobby.create_room(&user(1), new_room("host")).await.unwrap();
    let mut ids = Vec::new();
    for id in 2..=17 {
        let c = lobby
            .submit_challenge(&user(id), &room.token, "c")
            .await
            .unwrap();
        ids.push(c.id);
    }

    let mut tasks = Vec::new();
    for id in ids {
        let lobby = Arc::clone(&lobby);
        tasks.push(tokio::spawn(async move {
            lobby.reply_to_challenge(&user(1), id, true).await
        }));
    }

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidState),
        }
    }
    assert_eq!(wins, 1);

    let accepted = lobby
        .store()
        .challengers(room.id)
        .await
        .into_iter()
        .filter(|c| c.status == ChallengerStatus::Accepted)
        .count();
    assert_eq!(accepted, 1);
}

// =========================================================================
// Queries
// =========================================================================

#[tokio::test]
async fn test_my_room_lists_challengers_in_submission_order() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;
    for (id, nick) in [(2, "first"), (3, "second"), (4, "third")] {
        lobby
            .submit_challenge(&user(id), &room.token, nick)
            .await
            .unwrap();
    }

    let details = lobby.my_room(&user(1)).await.unwrap().unwrap();

    let nicks: Vec<_> = details.challengers.iter().map(|c| c.nickname.as_str()).collect();
    assert_eq!(nicks, ["first", "second", "third"]);
    assert_eq!(details.room.token, room.token);
}

#[tokio::test]
async fn test_my_room_without_room_is_none() {
    let (lobby, _) = setup();
    assert!(lobby.my_room(&user(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_my_request_follows_accepted_challenge_until_finish() {
    let (lobby, _) = setup();
    let (room, accepted) = matched_room(&lobby).await;

    let mine = lobby.my_request(&user(2)).await.unwrap().unwrap();
    assert_eq!(mine.challenger.id, accepted);
    assert_eq!(mine.room.state, GameState::Matched);
    // The rejected rival has nothing outstanding.
    assert!(lobby.my_request(&user(3)).await.unwrap().is_none());

    lobby.finish_game(&room.token).await.unwrap();
    assert!(lobby.my_request(&user(2)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_home_new_user_has_nothing_outstanding() {
    let (lobby, _) = setup();

    let home = lobby.home(&user(9)).await.unwrap();

    assert_eq!(home.user, UserId(9));
    assert!(!home.has_room && !home.has_request);
    assert!(home.room.is_none() && home.request.is_none());
    // Reading the home screen does not create a user row.
    assert!(lobby.store().user(UserId(9)).await.is_none());
}

#[tokio::test]
async fn test_home_reflects_flags_and_their_rooms() {
    let (lobby, _) = setup();
    let (room, _) = matched_room(&lobby).await;
    let other = open_room(&lobby, 4).await;
    lobby
        .submit_challenge(&user(3), &other.token, "bob")
        .await
        .unwrap();

    let owner = lobby.home(&user(1)).await.unwrap();
    assert!(owner.has_room && !owner.has_request);
    assert_eq!(owner.room.map(|r| r.token), Some(room.token.clone()));
    assert!(owner.request.is_none());

    let alice = lobby.home(&user(2)).await.unwrap();
    assert!(!alice.has_room && alice.has_request);
    assert_eq!(alice.request.map(|r| r.state), Some(GameState::Matched));

    // Rejected in room 1, pending in room 4.
    let bob = lobby.home(&user(3)).await.unwrap();
    assert!(bob.has_request);
    assert_eq!(bob.request.map(|r| r.token), Some(other.token));

    lobby.finish_game(&room.token).await.unwrap();
    let alice = lobby.home(&user(2)).await.unwrap();
    assert!(!alice.has_request && alice.request.is_none());
    // The owner keeps the finished room on the home screen.
    let owner = lobby.home(&user(1)).await.unwrap();
    assert_eq!(owner.room.map(|r| r.state), Some(GameState::Finished));
}

#[tokio::test]
async fn test_home_single_transient_fault_is_retried() {
    let (lobby, _) = setup();
    open_room(&lobby, 1).await;
    lobby.store().fail_next_begins(1);

    assert!(lobby.home(&user(1)).await.unwrap().has_room);
}

// =========================================================================
// Live-session hooks
// =========================================================================

#[tokio::test]
async fn test_authorize_live_assigns_roles() {
    let (lobby, _) = setup();
    let (room, _) = matched_room(&lobby).await;

    let owner = lobby.authorize_live(&user(1), &room.token).await.unwrap();
    let challenger = lobby.authorize_live(&user(2), &room.token).await.unwrap();

    assert_eq!((owner.role, owner.opponent), (Role::Owner, UserId(2)));
    assert_eq!(
        (challenger.role, challenger.opponent),
        (Role::Challenger, UserId(1))
    );
}

#[tokio::test]
async fn test_authorize_live_rejects_outsiders_and_unmatched_rooms() {
    let (lobby, _) = setup();
    let (room, _) = matched_room(&lobby).await;
    let open = open_room(&lobby, 5).await;

    for (who, token) in [
        (3, &room.token),
        (9, &room.token),
        (5, &open.token),
        (1, &RoomToken::new("nope")),
    ] {
        let result = lobby.authorize_live(&user(who), token).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Unauthorized);
    }
}

#[tokio::test]
async fn test_finish_game_sets_finish_time_and_is_idempotent() {
    let (lobby, clock) = setup();
    let (room, _) = matched_room(&lobby).await;
    lobby.mark_in_progress(&room.token).await.unwrap();
    clock.advance(Duration::from_secs(60));

    let finished = lobby.finish_game(&room.token).await.unwrap();
    clock.advance(Duration::from_secs(60));
    let again = lobby.finish_game(&room.token).await.unwrap();

    assert_eq!(finished.state, GameState::Finished);
    assert_eq!(finished.finish_time, Some(START + 60_000));
    assert_eq!(again.finish_time, finished.finish_time);
    assert_eq!(flags(&lobby, 2).await, (false, false));
    // The owner keeps the room until deleting it.
    assert_eq!(flags(&lobby, 1).await, (true, false));
}

#[tokio::test]
async fn test_mark_in_progress_requires_matched_room() {
    let (lobby, _) = setup();
    let room = open_room(&lobby, 1).await;

    let result = lobby.mark_in_progress(&room.token).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidState);
}

// =========================================================================
// Sweeper hooks
// =========================================================================

#[tokio::test]
async fn test_purge_stale_rooms_deletes_only_old_open_rooms() {
    let (lobby, clock) = setup();
    let old = open_room(&lobby, 1).await;
    lobby
        .submit_challenge(&user(2), &old.token, "x")
        .await
        .unwrap();
    clock.advance(Duration::from_secs(3_600));
    let young = open_room(&lobby, 3).await;
    clock.advance(Duration::from_secs(60));

    let purged = lobby
        .purge_stale_rooms(Duration::from_secs(1_800))
        .await
        .unwrap();

    assert_eq!(purged, vec![old.token.clone()]);
    assert!(lobby.room_by_token(&young.token).await.is_ok());
    assert_eq!(flags(&lobby, 1).await, (false, false));
    assert_eq!(flags(&lobby, 2).await, (false, false));
}

#[tokio::test]
async fn test_expire_orphaned_skips_live_rooms() {
    let (lobby, clock) = setup();
    let (room, _) = matched_room(&lobby).await;
    lobby.mark_in_progress(&room.token).await.unwrap();
    clock.advance(Duration::from_secs(600));

    let live: HashSet<_> = [room.token.clone()].into();
    let expired = lobby
        .expire_orphaned(Duration::from_secs(300), &live)
        .await
        .unwrap();

    assert!(expired.is_empty());
    assert_eq!(
        lobby.room_by_token(&room.token).await.unwrap().state,
        GameState::InProgress
    );
}

#[tokio::test]
async fn test_expire_orphaned_releases_flags() {
    let (lobby, clock) = setup();
    let (room, accepted) = matched_room(&lobby).await;
    lobby.mark_in_progress(&room.token).await.unwrap();
    clock.advance(Duration::from_secs(600));

    let expired = lobby
        .expire_orphaned(Duration::from_secs(300), &HashSet::new())
        .await
        .unwrap();

    assert_eq!(expired, vec![room.token.clone()]);
    let summary = lobby.room_by_token(&room.token).await.unwrap();
    assert_eq!(summary.state, GameState::Expired);
    assert_eq!(flags(&lobby, 1).await, (false, false));
    assert_eq!(flags(&lobby, 2).await, (false, false));
    let row = lobby
        .store()
        .challengers(room.id)
        .await
        .into_iter()
        .find(|c| c.id == accepted)
        .unwrap();
    assert_eq!(row.status, ChallengerStatus::Expired);
    // The owner may open a new room right away.
    assert!(lobby.create_room(&user(1), new_room("again")).await.is_ok());
}

#[tokio::test]
async fn test_expire_orphaned_recent_room_is_left_alone() {
    let (lobby, clock) = setup();
    let (room, _) = matched_room(&lobby).await;
    clock.advance(Duration::from_secs(10));

    let expired = lobby
        .expire_orphaned(Duration::from_secs(300), &HashSet::new())
        .await
        .unwrap();

    assert!(expired.is_empty());
    assert_eq!(
        lobby.room_by_token(&room.token).await.unwrap().state,
        GameState::Matched
    );
}

#[tokio::test]
async fn test_purge_closed_rooms_frees_owner_after_retention() {
    let (lobby, clock) = setup();
    let (room, _) = matched_room(&lobby).await;
    lobby.finish_game(&room.token).await.unwrap();
    clock.advance(Duration::from_secs(10));

    let early = lobby
        .purge_closed_rooms(Duration::from_secs(3_600))
        .await
        .unwrap();
    assert!(early.is_empty());

    clock.advance(Duration::from_secs(3_600));
    let purged = lobby
        .purge_closed_rooms(Duration::from_secs(3_600))
        .await
        .unwrap();

    assert_eq!(purged, vec![room.token.clone()]);
    assert_eq!(flags(&lobby, 1).await, (false, false));
    assert_eq!(lobby.store().room_count().await, 0);
}

#[tokio::test]
async fn test_purge_closed_expired_room_keeps_newer_room_flag() {
    let (lobby, clock) = setup();
    let (old, _) = matched_room(&lobby).await;
    clock.advance(Duration::from_secs(600));
    lobby
        .expire_orphaned(Duration::from_secs(300), &HashSet::new())
        .await
        .unwrap();
    let newer = open_room(&lobby, 1).await;
    clock.advance(Duration::from_secs(7_200));

    let purged = lobby
        .purge_closed_rooms(Duration::from_secs(3_600))
        .await
        .unwrap();

    assert_eq!(purged, vec![old.token]);
    assert_eq!(flags(&lobby, 1).await, (true, false));
    assert!(lobby.room_by_token(&newer.token).await.is_ok());
}

// =========================================================================
// End to end
// =========================================================================

#[tokio::test]
async fn test_lifecycle_accept_play_finish() {
    let (lobby, clock) = setup();
    let owner = user(10);
    let a = user(20);
    let b = user(30);

    let room = lobby.create_room(&owner, new_room("host")).await.unwrap();
    let ca = lobby.submit_challenge(&a, &room.token, "A").await.unwrap();
    let cb = lobby.submit_challenge(&b, &room.token, "B").await.unwrap();

    lobby.reply_to_challenge(&owner, ca.id, true).await.unwrap();
    let b_row = lobby
        .store()
        .challengers(room.id)
        .await
        .into_iter()
        .find(|c| c.id == cb.id)
        .unwrap();
    assert_eq!(b_row.status, ChallengerStatus::Rejected);

    lobby.authorize_live(&owner, &room.token).await.unwrap();
    lobby.authorize_live(&a, &room.token).await.unwrap();
    lobby.mark_in_progress(&room.token).await.unwrap();
    assert_eq!(
        lobby.room_by_token(&room.token).await.unwrap().state,
        GameState::InProgress
    );

    clock.advance(Duration::from_secs(90));
    let done = lobby.finish_game(&room.token).await.unwrap();

    assert_eq!(done.state, GameState::Finished);
    assert_eq!(done.finish_time, Some(START + 90_000));
}
