//! Presence transitions, snapshots and shutdown.

use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{user, Harness, ALICE, BOB};

#[tokio::test]
async fn test_presence_changes_only_on_first_and_last_session() {
    let harness = Harness::new();
    let mut bob = harness.connect(BOB).await;
    bob.drain();

    let first = harness.connect(ALICE).await;
    let second = harness.connect(ALICE).await;
    let updates = bob.take("PRESENCE_UPDATE");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["email"], json!(ALICE));
    assert_eq!(updates[0]["online"], json!(true));

    harness.disconnect(first);
    assert!(bob.take("PRESENCE_UPDATE").is_empty());
    assert!(harness.state.engine.presence().is_online(&user(ALICE)));

    harness.disconnect(second);
    let updates = bob.take("PRESENCE_UPDATE");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["online"], json!(false));
    assert!(updates[0]["lastSeen"].is_i64());
}

#[tokio::test]
async fn test_snapshot_includes_the_connecting_user() {
    let harness = Harness::new();
    let bob = harness.connect(BOB).await;
    harness.disconnect(bob);

    let mut alice = harness.connect(ALICE).await;
    let frames = alice.drain();
    assert_eq!(frames[0].t.as_deref(), Some("READY"));
    assert_eq!(frames[0].s, Some(1));
    assert_eq!(frames[0].d.as_ref().unwrap()["groups"], json!([1]));
    assert_eq!(frames[1].t.as_deref(), Some("PRESENCE_SNAPSHOT"));
    let snapshot = frames
        .iter()
        .find(|f| f.t.as_deref() == Some("PRESENCE_SNAPSHOT"))
        .unwrap();
    assert_eq!(snapshot.channel.as_deref(), Some("/session"));

    let entries = snapshot.d.as_ref().unwrap().as_array().unwrap();
    assert_eq!(entries[0]["email"], json!(ALICE));
    assert_eq!(entries[0]["online"], json!(true));
    assert_eq!(entries[1]["email"], json!(BOB));
    assert_eq!(entries[1]["online"], json!(false));
}

#[tokio::test]
async fn test_sequence_numbers_increase_per_session() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    let _bob = harness.connect(BOB).await;

    let sequences: Vec<u64> = alice.drain().iter().filter_map(|f| f.s).collect();
    assert!(sequences.len() >= 2);
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_shutdown_skips_catch_up() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    harness
        .send(&alice, "chat.send", json!({"to": BOB, "content": "later"}))
        .await;
    alice.drain();

    harness.state.engine.shutdown();
    assert!(harness.state.engine.is_shut_down());

    let _bob = harness.connect(BOB).await;
    assert!(alice.take("MESSAGES_DELIVERED").is_empty());

    let history = harness
        .state
        .engine
        .queries()
        .direct_history(&user(ALICE), BOB)
        .await
        .unwrap();
    assert!(!history[0].delivered);
}
