//! Health Check API Tests

use axum::http::StatusCode;
use serde_json::json;

use crate::common::{Harness, ALICE};

#[tokio::test]
async fn test_health_check_returns_ok() {
    let harness = Harness::new();

    let (status, body) = harness.get("/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
}

#[tokio::test]
async fn test_liveness_reports_alive() {
    let harness = Harness::new();

    let (status, body) = harness.get("/health/live", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("alive"));
}

#[tokio::test]
async fn test_readiness_reports_memory_storage_and_sessions() {
    let harness = Harness::new();
    let _alice = harness.connect(ALICE).await;

    let (status, body) = harness.get("/health/ready", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["storage"]["message"], json!("in-memory storage"));
    assert_eq!(body["checks"]["websocket"]["active_connections"], json!(1));
    assert_eq!(body["checks"]["websocket"]["online_users"], json!(1));
}

#[tokio::test]
async fn test_readiness_fails_after_shutdown() {
    let harness = Harness::new();
    harness.state.engine.shutdown();

    let (status, body) = harness.get("/health/ready", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], json!("unhealthy"));
}

#[tokio::test]
async fn test_metrics_are_exposed() {
    let harness = Harness::new();
    harness.get("/health", None).await;

    let (status, text) = harness.get_text("/metrics", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("chat_engine_http_requests_total"));
}
