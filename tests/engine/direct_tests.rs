//! Direct message delivery, catch-up and read receipts.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_test::assert_ok;

use crate::common::{user, Harness, ALICE, BOB};

const FIRST: &str = "0190a5d2-0000-7000-8000-000000000001";
const SECOND: &str = "0190a5d2-0000-7000-8000-000000000002";

fn ids_of(messages: &Value) -> Vec<String> {
    messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["messageId"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_offline_recipient_is_caught_up_then_reads() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    alice.drain();

    harness
        .send(&alice, "chat.send", json!({"to": BOB, "content": "hi", "messageId": FIRST}))
        .await;
    harness
        .send(&alice, "chat.send", json!({"to": BOB, "content": "there", "messageId": SECOND}))
        .await;

    let echoes = alice.take("MESSAGE");
    assert_eq!(echoes.len(), 2);
    assert_eq!(echoes[0]["delivered"], json!(false));

    // Bob comes online: both messages are delivered in one batch to alice.
    let mut bob = harness.connect(BOB).await;
    let delivered = alice.take("MESSAGES_DELIVERED");
    assert_eq!(delivered.len(), 1);
    let batch = &delivered[0]["messages"];
    assert_eq!(ids_of(batch), vec![FIRST.to_string(), SECOND.to_string()]);
    assert!(batch
        .as_array()
        .unwrap()
        .iter()
        .all(|m| m["delivered"] == json!(true) && m["deliveredAt"].is_i64()));

    // Bob reads the conversation.
    bob.drain();
    harness.send(&bob, "chat.read", json!({"from": ALICE})).await;
    let receipts = alice.take("READ_RECEIPT");
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0]["messageId"], json!(SECOND));
    assert_eq!(receipts[0]["messageIds"], json!([FIRST, SECOND]));
    assert_eq!(receipts[0]["from"], json!(BOB));

    // Reading again finds nothing new and sends nothing.
    harness.send(&bob, "chat.read", json!({"from": ALICE})).await;
    assert!(alice.take("READ_RECEIPT").is_empty());

    let history = assert_ok!(
        harness
            .state
            .engine
            .queries()
            .direct_history(&user(BOB), ALICE)
            .await
    );
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|m| m.delivered && m.read_at.is_some()));
}

#[tokio::test]
async fn test_second_catch_up_sends_nothing() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    harness
        .send(&alice, "chat.send", json!({"to": BOB, "content": "hi"}))
        .await;

    let bob = harness.connect(BOB).await;
    harness.disconnect(bob);
    alice.drain();

    let report = assert_ok!(harness.state.engine.catch_up().run(&user(BOB)).await);
    assert!(report.is_empty());

    let _bob = harness.connect(BOB).await;
    assert!(alice.take("MESSAGES_DELIVERED").is_empty());
}

#[tokio::test]
async fn test_explicit_ack_notifies_sender_once() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    let bob = harness.connect(BOB).await;
    alice.drain();

    harness
        .send(&alice, "chat.send", json!({"to": BOB, "content": "ping", "messageId": FIRST}))
        .await;
    harness.send(&bob, "chat.delivered", json!({"messageId": FIRST})).await;
    harness.send(&bob, "chat.delivered", json!({"messageId": FIRST})).await;

    let delivered = alice.take("MESSAGES_DELIVERED");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["messages"][0]["messageId"], json!(FIRST));
}

#[tokio::test]
async fn test_retried_send_is_stored_once() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    let mut bob = harness.connect(BOB).await;
    alice.drain();
    bob.drain();

    for _ in 0..3 {
        harness
            .send(&alice, "chat.send", json!({"to": BOB, "content": "once", "messageId": FIRST}))
            .await;
    }

    assert_eq!(bob.take("MESSAGE").len(), 1);
    assert_eq!(alice.take("MESSAGE").len(), 3);
    let history = harness
        .state
        .engine
        .queries()
        .direct_history(&user(ALICE), BOB)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_history_keeps_send_order() {
    let harness = Harness::new();
    let alice = harness.connect(ALICE).await;
    let bob = harness.connect(BOB).await;

    harness.send(&alice, "chat.send", json!({"to": BOB, "content": "1"})).await;
    harness.send(&bob, "chat.send", json!({"to": ALICE, "content": "2"})).await;
    harness.send(&alice, "chat.send", json!({"to": BOB, "content": "3"})).await;

    let history = harness
        .state
        .engine
        .queries()
        .direct_history(&user(BOB), "Alice@Example.com")
        .await
        .unwrap();
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_public_message_reaches_every_session() {
    let harness = Harness::new();
    let alice = harness.connect(ALICE).await;
    let mut bob = harness.connect(BOB).await;
    bob.drain();

    harness.send(&alice, "chat.send", json!({"content": "hello all"})).await;
    harness.send(&alice, "chat.join", json!({})).await;

    let public = bob.take("PUBLIC_MESSAGE");
    assert_eq!(public.len(), 2);
    assert_eq!(public[0]["content"], json!("hello all"));
    assert_eq!(public[1]["type"], json!("JOIN"));
    assert_eq!(public[1]["content"], json!("Alice joined the chat"));
}
