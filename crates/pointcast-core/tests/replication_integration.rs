//! End-to-end replication tests: one facilitator, several spokes, full
//! rounds over the in-process transport.

use std::time::Duration;

use pointcast_core::{
    Session, SessionCode, SessionError, SessionLifecycleController, SessionStatus, Storage,
    Switchboard, CODE_ALPHABET, CODE_LEN, DEFAULT_VOTER_CAP,
};
use tempfile::TempDir;

fn controller(board: &Switchboard, temp: &TempDir, name: &str) -> SessionLifecycleController {
    let storage = Storage::new(temp.path().join(format!("{}.redb", name))).unwrap();
    SessionLifecycleController::new(board.clone(), storage)
}

/// Poll a controller's session view until the predicate holds
async fn wait_until(
    ctl: &SessionLifecycleController,
    what: &str,
    pred: impl Fn(&Session) -> bool,
) -> Session {
    for _ in 0..200 {
        let session = ctl.session().await.unwrap();
        if pred(&session) {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

#[tokio::test]
async fn happy_path_round() {
    let board = Switchboard::new();
    let temp = TempDir::new().unwrap();

    let mut host = controller(&board, &temp, "host");
    let code = host.create_session("Dana").await.unwrap();
    assert_eq!(code.as_str().len(), CODE_LEN);
    assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));

    let mut alice = controller(&board, &temp, "alice");
    let mirror = alice.join_session("Alice", code.as_str()).await.unwrap();
    let alice_id = mirror
        .participants
        .iter()
        .find(|p| p.display_name == "Alice")
        .unwrap()
        .id;

    let session = wait_until(&host, "Alice enrolled", |s| s.participants.len() == 2).await;
    assert_eq!(session.participants.get(&alice_id).unwrap().vote, None);

    host.launch_vote(Some("Story 1")).await.unwrap();
    wait_until(&alice, "round open", |s| {
        s.status == SessionStatus::Voting && s.current_item == "Story 1"
    })
    .await;

    alice.cast_vote(5).await.unwrap();
    wait_until(&host, "vote recorded", |s| {
        s.participants.get(&alice_id).unwrap().vote == Some(5)
    })
    .await;

    host.reveal_votes().await.unwrap();
    let revealed = wait_until(&alice, "votes revealed", |s| {
        s.status == SessionStatus::Revealed
    })
    .await;
    assert_eq!(revealed.participants.get(&alice_id).unwrap().vote, Some(5));
}

#[tokio::test]
async fn ninth_voter_is_refused() {
    let board = Switchboard::new();
    let temp = TempDir::new().unwrap();

    let mut host = controller(&board, &temp, "host");
    let code = host.create_session("Dana").await.unwrap();

    let mut voters = Vec::new();
    for i in 0..DEFAULT_VOTER_CAP {
        let mut voter = controller(&board, &temp, &format!("voter{}", i));
        voter
            .join_session(&format!("Voter {}", i), code.as_str())
            .await
            .unwrap();
        voters.push(voter);
    }
    wait_until(&host, "room full", |s| {
        s.participants.len() == DEFAULT_VOTER_CAP + 1
    })
    .await;

    let mut ninth = controller(&board, &temp, "ninth");
    let result = ninth.join_session("Ninth", code.as_str()).await;
    assert!(matches!(result, Err(SessionError::SessionFull)));

    let session = host.session().await.unwrap();
    assert_eq!(session.participants.len(), DEFAULT_VOTER_CAP + 1);
}

#[tokio::test]
async fn disconnect_cleans_up_roster_everywhere() {
    let board = Switchboard::new();
    let temp = TempDir::new().unwrap();

    let mut host = controller(&board, &temp, "host");
    let code = host.create_session("Dana").await.unwrap();

    let mut alice = controller(&board, &temp, "alice");
    alice.join_session("Alice", code.as_str()).await.unwrap();
    let mut bob = controller(&board, &temp, "bob");
    bob.join_session("Bob", code.as_str()).await.unwrap();
    wait_until(&host, "both joined", |s| s.participants.len() == 3).await;

    // Bob's process dies without a leave intent.
    drop(bob);

    wait_until(&host, "Bob removed once", |s| s.participants.len() == 2).await;
    let alice_view = wait_until(&alice, "Alice sees smaller roster", |s| {
        s.participants.len() == 2
    })
    .await;
    assert!(alice_view
        .participants
        .iter()
        .all(|p| p.display_name != "Bob"));
}

#[tokio::test]
async fn late_joiner_converges_from_single_snapshot() {
    let board = Switchboard::new();
    let temp = TempDir::new().unwrap();

    let mut host = controller(&board, &temp, "host");
    let code = host.create_session("Dana").await.unwrap();

    // A burst of mutations before anyone is watching.
    host.launch_vote(Some("Story 1")).await.unwrap();
    host.update_item("Story 1 (amended)").await.unwrap();
    host.reveal_votes().await.unwrap();
    host.new_round().await.unwrap();
    host.launch_vote(Some("Story 2")).await.unwrap();

    // The late joiner never saw the intermediate broadcasts; a single
    // snapshot must fully converge its mirror.
    let mut late = controller(&board, &temp, "late");
    let mirror = late.join_session("Late", code.as_str()).await.unwrap();

    let authoritative = wait_until(&host, "late joiner enrolled", |s| {
        s.participants.len() == 2
    })
    .await;
    let settled = wait_until(&late, "mirrors equal", |s| s == &authoritative).await;
    assert_eq!(settled, authoritative);
    assert_eq!(settled.status, SessionStatus::Voting);
    assert_eq!(settled.current_item, "Story 2");
}

#[tokio::test]
async fn revote_overwrites_not_appends() {
    let board = Switchboard::new();
    let temp = TempDir::new().unwrap();

    let mut host = controller(&board, &temp, "host");
    let code = host.create_session("Dana").await.unwrap();

    let mut alice = controller(&board, &temp, "alice");
    let mirror = alice.join_session("Alice", code.as_str()).await.unwrap();
    let alice_id = mirror
        .participants
        .iter()
        .find(|p| !p.is_facilitator)
        .unwrap()
        .id;

    host.launch_vote(Some("Story 1")).await.unwrap();
    wait_until(&alice, "round open", |s| s.status == SessionStatus::Voting).await;

    alice.cast_vote(3).await.unwrap();
    wait_until(&host, "first vote", |s| {
        s.participants.get(&alice_id).unwrap().vote == Some(3)
    })
    .await;
    alice.cast_vote(8).await.unwrap();
    let session = wait_until(&host, "revote", |s| {
        s.participants.get(&alice_id).unwrap().vote == Some(8)
    })
    .await;
    assert_eq!(session.participants.len(), 2);
}

#[tokio::test]
async fn session_code_parse_accepts_what_create_produces() {
    let board = Switchboard::new();
    let temp = TempDir::new().unwrap();

    let mut host = controller(&board, &temp, "host");
    let code = host.create_session("Dana").await.unwrap();

    let reparsed = SessionCode::parse(&code.as_str().to_ascii_lowercase()).unwrap();
    assert_eq!(reparsed, code);
}
