//! Message Query API Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{token, Harness, ALICE, BOB, CAROL, DAVE};

const GROUP_MSG: &str = "0190a5d2-0000-7000-8000-0000000000b1";

#[tokio::test]
async fn test_api_requires_bearer_token() {
    let harness = Harness::new();

    let (status, _) = harness.get("/api/v1/messages/conversations", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = harness
        .get("/api/v1/messages/conversations", Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!(10003));
}

#[tokio::test]
async fn test_direct_history_and_sync() {
    let harness = Harness::new();
    let alice = harness.connect(ALICE).await;
    harness
        .send(&alice, "chat.send", json!({"to": BOB, "content": "first"}))
        .await;
    harness
        .send(&alice, "chat.send", json!({"to": BOB, "content": "second"}))
        .await;

    let (status, body) = harness
        .get(&format!("/api/v1/messages/{}", ALICE), Some(&token(BOB)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["first", "second"]);
    assert_eq!(body[0]["delivered"], json!(false));

    let (status, body) = harness
        .get("/api/v1/messages/sync?since=0", Some(&token(BOB)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = harness
        .get("/api/v1/messages/sync?since=-5", Some(&token(BOB)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!(10002));
}

#[tokio::test]
async fn test_malformed_counterpart_is_bad_request() {
    let harness = Harness::new();

    let (status, _) = harness
        .get("/api/v1/messages/not-an-email", Some(&token(ALICE)))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_conversations_use_display_names() {
    let harness = Harness::new();
    let alice = harness.connect(ALICE).await;
    let carol = harness.connect(CAROL).await;
    harness
        .send(&alice, "chat.send", json!({"to": BOB, "content": "to bob"}))
        .await;
    harness
        .send(&carol, "chat.send", json!({"to": ALICE, "content": "from carol"}))
        .await;

    let (status, body) = harness
        .get("/api/v1/messages/conversations", Some(&token(ALICE)))
        .await;

    assert_eq!(status, StatusCode::OK);
    let summaries = body.as_array().unwrap();
    assert_eq!(summaries.len(), 2);
    let bob = summaries.iter().find(|s| s["id"] == json!(BOB)).unwrap();
    assert_eq!(bob["name"], json!("Bob"));
    assert_eq!(bob["lastMessage"], json!("to bob"));
    // Carol has no display name.
    let carol = summaries.iter().find(|s| s["id"] == json!(CAROL)).unwrap();
    assert_eq!(carol["name"], json!(CAROL));
}

#[tokio::test]
async fn test_group_history_and_receipts_are_members_only() {
    let harness = Harness::new();
    let alice = harness.connect(ALICE).await;
    let bob = harness.connect(BOB).await;
    harness
        .send(
            &alice,
            "group.send",
            json!({"groupId": 1, "content": "hello team", "messageId": GROUP_MSG}),
        )
        .await;
    harness
        .send(&bob, "group.read", json!({"groupId": 1, "messageIds": [GROUP_MSG]}))
        .await;

    let (status, body) = harness
        .get("/api/v1/groups/1/messages", Some(&token(CAROL)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["content"], json!("hello team"));
    assert_eq!(body[0]["senderName"], json!("Alice"));

    let (status, body) = harness
        .get(
            &format!("/api/v1/groups/messages/{}/receipts", GROUP_MSG),
            Some(&token(ALICE)),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deliveredRecipients"], json!([BOB]));
    assert_eq!(body["readRecipients"][0]["email"], json!(BOB));

    let (status, _) = harness
        .get("/api/v1/groups/1/messages", Some(&token(DAVE)))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = harness
        .get("/api/v1/groups/99/messages", Some(&token(ALICE)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_presence_lists_online_first() {
    let harness = Harness::new();
    let bob = harness.connect(BOB).await;
    harness.disconnect(bob);
    let _alice = harness.connect(ALICE).await;

    let (status, body) = harness.get("/api/v1/presence", Some(&token(CAROL))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["email"], json!(ALICE));
    assert_eq!(body[0]["online"], json!(true));
    assert_eq!(body[1]["email"], json!(BOB));
    assert!(body[1]["lastSeen"].is_i64());
}
