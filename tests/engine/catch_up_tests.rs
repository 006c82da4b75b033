//! Catch-up completeness across senders and groups.

use pretty_assertions::assert_eq;
use serde_json::json;

use chat_engine::application::services::CatchUpReport;
use chat_engine::domain::GroupId;

use crate::common::{user, Harness, ALICE, BOB, CAROL, TEAM};

const OPS: GroupId = GroupId(2);

const TEAM_MSGS: [&str; 2] = [
    "0190a5d2-0000-7000-8000-0000000000c1",
    "0190a5d2-0000-7000-8000-0000000000c2",
];
const OPS_MSGS: [&str; 2] = [
    "0190a5d2-0000-7000-8000-0000000000d1",
    "0190a5d2-0000-7000-8000-0000000000d2",
];

#[tokio::test]
async fn test_offline_user_is_caught_up_once_per_sender_and_group() {
    let harness = Harness::new();
    harness
        .directory
        .upsert_group(OPS, vec![user(ALICE), user(BOB), user(CAROL)]);

    let mut alice = harness.connect(ALICE).await;
    let mut bob = harness.connect(BOB).await;
    for topic in ["group.1.delivery", "group.2.delivery"] {
        harness.send(&alice, "subscribe", json!({"topic": topic})).await;
    }

    // Carol has never connected: three direct messages from two senders...
    for content in ["one", "two"] {
        harness
            .send(&alice, "chat.send", json!({"to": CAROL, "content": content}))
            .await;
    }
    harness
        .send(&bob, "chat.send", json!({"to": CAROL, "content": "three"}))
        .await;
    // ...and two messages in each of her groups.
    for id in TEAM_MSGS {
        harness
            .send(
                &alice,
                "group.send",
                json!({"groupId": TEAM.0, "content": "team", "messageId": id}),
            )
            .await;
    }
    harness
        .send(
            &alice,
            "group.send",
            json!({"groupId": OPS.0, "content": "ops", "messageId": OPS_MSGS[0]}),
        )
        .await;
    harness
        .send(
            &bob,
            "group.send",
            json!({"groupId": OPS.0, "content": "ops", "messageId": OPS_MSGS[1]}),
        )
        .await;
    alice.drain();
    bob.drain();

    let report = harness
        .state
        .engine
        .catch_up()
        .run(&user(CAROL))
        .await
        .unwrap();
    assert_eq!(
        report,
        CatchUpReport {
            direct_delivered: 3,
            group_delivered: 4,
            senders_notified: 2,
            groups_notified: 2,
        }
    );

    let queries = harness.state.engine.queries();
    for sender in [ALICE, BOB] {
        let history = queries.direct_history(&user(CAROL), sender).await.unwrap();
        assert!(history.iter().all(|m| m.delivered));
    }
    for id in TEAM_MSGS.iter().chain(OPS_MSGS.iter()) {
        let receipts = queries.group_receipts(&user(ALICE), id).await.unwrap();
        assert!(receipts.delivered_recipients.contains(&user(CAROL)));
    }

    let delivered = alice.take_all(&["MESSAGES_DELIVERED", "GROUP_DELIVERY"]);
    let direct: Vec<_> = delivered
        .iter()
        .filter(|(t, _)| t == "MESSAGES_DELIVERED")
        .collect();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].1["messages"].as_array().unwrap().len(), 2);
    let groups: Vec<_> = delivered
        .iter()
        .filter(|(t, _)| t == "GROUP_DELIVERY")
        .map(|(_, d)| (d["groupId"].clone(), d["updates"].as_array().unwrap().len()))
        .collect();
    assert_eq!(groups.len(), 2);
    assert!(groups.contains(&(json!(1), 2)));
    assert!(groups.contains(&(json!(2), 2)));

    let bob_delivered = bob.take("MESSAGES_DELIVERED");
    assert_eq!(bob_delivered.len(), 1);
    assert_eq!(bob_delivered[0]["messages"].as_array().unwrap().len(), 1);

    // Connecting, leaving and coming back finds nothing new.
    let carol = harness.connect(CAROL).await;
    harness.disconnect(carol);
    let _carol = harness.connect(CAROL).await;

    assert!(alice
        .take_all(&["MESSAGES_DELIVERED", "GROUP_DELIVERY"])
        .is_empty());
    assert!(bob.take("MESSAGES_DELIVERED").is_empty());
    let again = harness
        .state
        .engine
        .catch_up()
        .run(&user(CAROL))
        .await
        .unwrap();
    assert!(again.is_empty());
}
