//! Group fan-out, delivery aggregation and read receipts.

use pretty_assertions::assert_eq;
use serde_json::json;

use chat_engine::application::channels::Topic;

use crate::common::{user, Harness, ALICE, BOB, CAROL, DAVE, TEAM};

const MSG: &str = "0190a5d2-0000-7000-8000-0000000000a1";

#[tokio::test]
async fn test_group_message_delivery_and_read_flow() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    let mut bob = harness.connect(BOB).await;
    harness.send(&alice, "subscribe", json!({"topic": "group.1.delivery"})).await;
    harness.send(&alice, "subscribe", json!({"topic": "group.1.read"})).await;
    alice.drain();
    bob.drain();

    harness
        .send(&alice, "group.send", json!({"groupId": 1, "content": "standup?", "messageId": MSG}))
        .await;

    let received = bob.take("GROUP_MESSAGE");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["senderName"], json!("Alice"));
    assert_eq!(received[0]["groupId"], json!(1));

    // Bob acknowledges live.
    harness
        .send(&bob, "group.delivered", json!({"groupId": "1", "messageId": MSG}))
        .await;
    let deliveries = alice.take("GROUP_DELIVERY");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0]["updates"][0]["deliveredRecipients"], json!([BOB]));

    // Carol was offline and is caught up on connect.
    let mut carol = harness.connect(CAROL).await;
    let deliveries = alice.take("GROUP_DELIVERY");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(
        deliveries[0]["updates"][0]["deliveredRecipients"],
        json!([BOB, CAROL])
    );

    carol.drain();
    harness
        .send(&carol, "group.read", json!({"groupId": 1, "messageIds": [MSG]}))
        .await;
    let reads = alice.take("GROUP_READ");
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0]["readRecipients"][0]["email"], json!(CAROL));

    let receipts = harness
        .state
        .engine
        .queries()
        .group_receipts(&user(BOB), MSG)
        .await
        .unwrap();
    assert_eq!(receipts.delivered_recipients.len(), 2);
    assert_eq!(receipts.read_recipients.len(), 1);
}

#[tokio::test]
async fn test_read_without_delivery_synthesizes_delivery() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    let bob = harness.connect(BOB).await;
    harness.send(&alice, "subscribe", json!({"topic": "group.1.delivery"})).await;
    harness
        .send(&alice, "group.send", json!({"groupId": 1, "content": "hi", "messageId": MSG}))
        .await;
    alice.drain();

    harness
        .send(&bob, "group.read", json!({"groupId": 1, "messageIds": [MSG]}))
        .await;

    let deliveries = alice.take("GROUP_DELIVERY");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0]["updates"][0]["deliveredRecipients"], json!([BOB]));
}

#[tokio::test]
async fn test_sender_acks_on_own_message_are_ignored() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    harness.send(&alice, "subscribe", json!({"topic": "group.1.delivery"})).await;
    harness
        .send(&alice, "group.send", json!({"groupId": 1, "content": "hi", "messageId": MSG}))
        .await;
    harness
        .send(&alice, "group.delivered", json!({"groupId": 1, "messageId": MSG}))
        .await;
    harness
        .send(&alice, "group.read", json!({"groupId": 1, "messageIds": [MSG]}))
        .await;

    assert!(alice.take("GROUP_DELIVERY").is_empty());
    let receipts = harness
        .state
        .engine
        .queries()
        .group_receipts(&user(ALICE), MSG)
        .await
        .unwrap();
    assert!(receipts.delivered_recipients.is_empty());
    assert!(receipts.read_recipients.is_empty());
}

#[tokio::test]
async fn test_non_member_is_rejected_on_own_session_only() {
    let harness = Harness::new();
    let mut alice = harness.connect(ALICE).await;
    let mut dave = harness.connect(DAVE).await;
    alice.drain();
    dave.drain();

    harness
        .send(&dave, "group.send", json!({"groupId": 1, "content": "let me in"}))
        .await;
    harness.send(&dave, "subscribe", json!({"topic": "group.1"})).await;

    let rejected = dave.take("REJECTED");
    assert_eq!(rejected.len(), 2);
    assert_eq!(rejected[0]["event"], json!("group.send"));
    assert_eq!(rejected[0]["code"], json!("forbidden"));
    assert_eq!(rejected[1]["event"], json!("subscribe"));
    assert!(alice.drain().is_empty());
    assert!(!harness
        .state
        .gateway
        .is_subscribed(&dave.session_id, Topic::Group(TEAM)));
}

#[tokio::test]
async fn test_group_messages_are_published_to_topic_subscribers() {
    let harness = Harness::new();
    let alice = harness.connect(ALICE).await;
    let mut bob = harness.connect(BOB).await;
    harness.send(&bob, "subscribe", json!({"topic": "group.1"})).await;
    harness.send(&bob, "subscribe", json!({"topic": "group.1.typing"})).await;
    bob.drain();

    harness.send(&alice, "group.typing", json!({"groupId": 1})).await;
    harness
        .send(&alice, "group.send", json!({"groupId": 1, "content": "hi"}))
        .await;

    let frames = bob.drain();
    let channels: Vec<(&str, &str)> = frames
        .iter()
        .map(|f| (f.t.as_deref().unwrap(), f.channel.as_deref().unwrap()))
        .collect();
    assert_eq!(
        channels,
        vec![
            ("GROUP_TYPING", "/topic/group.1.typing"),
            ("GROUP_MESSAGE", "/topic/group.1"),
            ("GROUP_MESSAGE", "/user/queue/group.messages"),
        ]
    );
}
