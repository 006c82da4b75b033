//! Route Configuration
//!
//! Configures all HTTP routes for the API.

use axum::{middleware, response::IntoResponse, routing::get, Router};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::{auth_middleware, track_http_metrics};
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state.clone()))
        // WebSocket gateway endpoint, authenticated by Identify
        .route("/gateway", get(ws_handler))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_http_metrics))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// API v1 routes (all protected)
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/messages", message_routes())
        .nest("/groups", group_routes())
        .route("/presence", get(handlers::presence::get_presence))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Direct message routes
fn message_routes() -> Router<AppState> {
    Router::new()
        .route("/sync", get(handlers::message::sync_messages))
        .route("/conversations", get(handlers::message::get_conversations))
        .route("/{other}", get(handlers::message::get_direct_history))
}

/// Group message routes
fn group_routes() -> Router<AppState> {
    Router::new()
        .route("/{group_id}/messages", get(handlers::message::get_group_history))
        .route(
            "/messages/{message_id}/receipts",
            get(handlers::message::get_group_receipts),
        )
}
