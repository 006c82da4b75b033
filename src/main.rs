//! # Chat Engine
//!
//! Presence and delivery-tracking chat backend.
//!
//! This is the application entry point that initializes:
//! - Configuration loading
//! - Tracing/logging subsystem
//! - Storage backend (in-memory or PostgreSQL)
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use chat_engine::config::Settings;
use chat_engine::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Settings decide the log format, so they load first
    let settings = Settings::load()?;

    chat_engine::telemetry::init_tracing(settings.log.json);

    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        backend = ?settings.storage.backend,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    info!("Server stopped");
    Ok(())
}
