//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - HTTP request counts by method, path, and status
//! - HTTP request latency histograms
//! - Active gateway sessions and online users
//! - Persisted messages, duplicate appends and catch-up deliveries
//! - Dropped realtime events by reason
//! - Database query duration histograms

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter - tracks total requests by method, path, and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace("chat_engine"),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram - tracks request duration in seconds
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace("chat_engine")
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Identified gateway sessions
pub static GATEWAY_SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("gateway_sessions_active", "Number of identified gateway sessions")
            .namespace("chat_engine"),
    )
    .expect("Failed to create GATEWAY_SESSIONS_ACTIVE metric")
});

/// Users with at least one live session
pub static USERS_ONLINE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("users_online", "Number of users with at least one session")
            .namespace("chat_engine"),
    )
    .expect("Failed to create USERS_ONLINE metric")
});

/// Messages persisted, by kind ("direct", "group", "public")
pub static MESSAGES_PERSISTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("messages_persisted_total", "Messages appended to the store")
            .namespace("chat_engine"),
        &["kind"],
    )
    .expect("Failed to create MESSAGES_PERSISTED_TOTAL metric")
});

/// Appends absorbed because the message id already existed
pub static DUPLICATE_APPENDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("duplicate_appends_total", "Appends that hit an existing message id")
            .namespace("chat_engine"),
        &["kind"],
    )
    .expect("Failed to create DUPLICATE_APPENDS_TOTAL metric")
});

/// Delivery rows created by the reconnect catch-up pass, by kind
pub static CATCH_UP_DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("catch_up_deliveries_total", "Deliveries recorded by catch-up")
            .namespace("chat_engine"),
        &["kind"],
    )
    .expect("Failed to create CATCH_UP_DELIVERIES_TOTAL metric")
});

/// Realtime events dropped, by event and reason
pub static EVENTS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_dropped_total", "Inbound events dropped after an error")
            .namespace("chat_engine"),
        &["event", "reason"],
    )
    .expect("Failed to create EVENTS_DROPPED_TOTAL metric")
});

/// Database query duration histogram
pub static DB_QUERY_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
    HistogramVec::new(
        HistogramOpts::new(
            "db_query_duration_seconds",
            "Database query latency in seconds",
        )
        .namespace("chat_engine")
        .buckets(buckets),
        &["operation", "table"],
    )
    .expect("Failed to create DB_QUERY_DURATION_SECONDS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("Failed to register HTTP_REQUESTS_TOTAL");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");
    registry
        .register(Box::new(GATEWAY_SESSIONS_ACTIVE.clone()))
        .expect("Failed to register GATEWAY_SESSIONS_ACTIVE");
    registry
        .register(Box::new(USERS_ONLINE.clone()))
        .expect("Failed to register USERS_ONLINE");
    registry
        .register(Box::new(MESSAGES_PERSISTED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_PERSISTED_TOTAL");
    registry
        .register(Box::new(DUPLICATE_APPENDS_TOTAL.clone()))
        .expect("Failed to register DUPLICATE_APPENDS_TOTAL");
    registry
        .register(Box::new(CATCH_UP_DELIVERIES_TOTAL.clone()))
        .expect("Failed to register CATCH_UP_DELIVERIES_TOTAL");
    registry
        .register(Box::new(EVENTS_DROPPED_TOTAL.clone()))
        .expect("Failed to register EVENTS_DROPPED_TOTAL");
    registry
        .register(Box::new(DB_QUERY_DURATION_SECONDS.clone()))
        .expect("Failed to register DB_QUERY_DURATION_SECONDS");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

/// Helper to record database query metrics
pub fn record_db_query(operation: &str, table: &str, duration_secs: f64) {
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation, table])
        .observe(duration_secs);
}

pub fn set_gateway_sessions(sessions: usize) {
    GATEWAY_SESSIONS_ACTIVE.set(sessions as i64);
}

pub fn set_online_users(users: usize) {
    USERS_ONLINE.set(users as i64);
}

pub fn record_persisted(kind: &str, inserted: bool) {
    if inserted {
        MESSAGES_PERSISTED_TOTAL.with_label_values(&[kind]).inc();
    } else {
        DUPLICATE_APPENDS_TOTAL.with_label_values(&[kind]).inc();
    }
}

pub fn record_catch_up(kind: &str, count: usize) {
    CATCH_UP_DELIVERIES_TOTAL
        .with_label_values(&[kind])
        .inc_by(count as u64);
}

pub fn record_dropped_event(event: &str, reason: &str) {
    EVENTS_DROPPED_TOTAL.with_label_values(&[event, reason]).inc();
}
