//! Health Check Handlers
//!
//! `/health` and `/health/live` only prove the process answers. `/health/ready`
//! checks storage and the engine and answers 503 once either is unusable, which
//! includes the window after shutdown has closed the catch-up pool.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::time::{Duration, Instant};

use crate::startup::AppState;

static SERVER_START: Lazy<(Instant, DateTime<Utc>)> = Lazy::new(|| (Instant::now(), Utc::now()));

/// Slower storage pings report `degraded`.
const STORAGE_DEGRADED_AFTER: Duration = Duration::from_millis(100);

/// Pin the uptime origin; called once during startup.
pub fn init_server_start() {
    Lazy::force(&SERVER_START);
}

/// Ordered from best to worst, so the overall status is the maximum.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    fn up(message: Option<&str>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: None,
            message: message.map(str::to_string),
        }
    }

    fn down(message: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GatewayHealth {
    pub active_connections: usize,
    pub online_users: usize,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub storage: ComponentHealth,
    pub engine: ComponentHealth,
    pub websocket: GatewayHealth,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub checks: ReadinessChecks,
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let storage = match &state.db {
        Some(pool) => ping_database(pool).await,
        None => ComponentHealth::up(Some("in-memory storage")),
    };
    let engine = if state.engine.is_shut_down() {
        ComponentHealth::down("engine is shutting down".into())
    } else {
        ComponentHealth::up(None)
    };

    let status = overall_status(&[&storage, &engine]);
    let (started, started_at) = &*SERVER_START;
    let response = ReadinessResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: started.elapsed().as_secs(),
        started_at: started_at.to_rfc3339(),
        checks: ReadinessChecks {
            storage,
            engine,
            websocket: GatewayHealth {
                active_connections: state.gateway.session_count(),
                online_users: state.engine.registry().online_count(),
            },
        },
    };

    let code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(response))
}

async fn ping_database(pool: &PgPool) -> ComponentHealth {
    let start = Instant::now();
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => {
            let elapsed = start.elapsed();
            ComponentHealth {
                status: if elapsed < STORAGE_DEGRADED_AFTER {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                },
                latency_ms: Some(elapsed.as_millis() as u64),
                message: None,
            }
        }
        Err(e) => ComponentHealth::down(format!("database ping failed: {}", e)),
    }
}

fn overall_status(components: &[&ComponentHealth]) -> HealthStatus {
    components
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}
