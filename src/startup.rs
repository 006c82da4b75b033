//! Application Startup
//!
//! Backend selection, application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;

use crate::application::services::{ChatEngine, EngineBackend, EngineOptions};
use crate::config::{Settings, StorageBackend};
use crate::domain::{GroupDirectory, IdentityResolver};
use crate::infrastructure::database;
use crate::infrastructure::identity::JwtIdentityResolver;
use crate::infrastructure::memory::{
    MemoryDatabase, MemoryDeliveryLedger, MemoryDirectory, MemoryMessageStore,
};
use crate::infrastructure::repositories::{
    PgDeliveryLedger, PgGroupDirectory, PgMessageStore, PgUserDirectory,
};
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::Gateway;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub engine: Arc<ChatEngine>,
    pub gateway: Arc<Gateway>,
    pub identity: Arc<dyn IdentityResolver>,
    pub groups: Arc<dyn GroupDirectory>,
    /// Present only for the postgres backend
    pub db: Option<PgPool>,
}

impl AppState {
    /// Wire an engine over `backend`, dispatching through a fresh gateway.
    pub fn new(settings: Settings, backend: EngineBackend, db: Option<PgPool>) -> Self {
        let gateway = Arc::new(Gateway::new(settings.websocket.heartbeat_interval_ms));
        let engine = Arc::new(ChatEngine::new(
            backend.clone(),
            gateway.clone(),
            EngineOptions {
                catch_up_concurrency: settings.engine.catch_up_concurrency,
            },
        ));
        let identity = Arc::new(JwtIdentityResolver::new(&settings.jwt.secret));

        Self {
            settings: Arc::new(settings),
            engine,
            gateway,
            identity,
            groups: backend.groups,
            db,
        }
    }
}

/// In-process backend over a shared directory.
pub fn memory_backend(directory: Arc<MemoryDirectory>) -> EngineBackend {
    let db = Arc::new(MemoryDatabase::new());
    EngineBackend {
        store: Arc::new(MemoryMessageStore::new(db.clone())),
        ledger: Arc::new(MemoryDeliveryLedger::new(db)),
        groups: directory.clone(),
        users: directory,
    }
}

pub fn postgres_backend(pool: PgPool) -> EngineBackend {
    EngineBackend {
        store: Arc::new(PgMessageStore::new(pool.clone())),
        ledger: Arc::new(PgDeliveryLedger::new(pool.clone())),
        groups: Arc::new(PgGroupDirectory::new(pool.clone())),
        users: Arc::new(PgUserDirectory::new(pool)),
    }
}

/// Build the backend selected by `storage.backend`.
pub async fn create_backend(settings: &Settings) -> Result<(EngineBackend, Option<PgPool>)> {
    match settings.storage.backend {
        StorageBackend::Memory => {
            let directory = match &settings.storage.seed_file {
                Some(path) => {
                    tracing::info!(path = %path, "Loading directory seed");
                    MemoryDirectory::from_seed_file(path)?
                }
                None => MemoryDirectory::new(),
            };
            tracing::info!("Using in-memory storage");
            Ok((memory_backend(Arc::new(directory)), None))
        }
        StorageBackend::Postgres => {
            let pool = database::create_pool(&settings.database).await?;
            tracing::info!("Database connection pool created");

            database::run_migrations(&pool).await?;
            tracing::info!("Database migrations applied");

            Ok((postgres_backend(pool.clone()), Some(pool)))
        }
    }
}

/// Router with every route and the global middleware stack.
pub fn create_app(state: AppState) -> Router {
    let cors = cors::create_cors_layer(&state.settings.cors);
    routes::create_router(state)
        .layer(logging::create_trace_layer())
        .layer(cors)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    engine: Arc<ChatEngine>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();

        let (backend, db) = create_backend(&settings).await?;
        let addr = settings.server_addr();
        let state = AppState::new(settings, backend, db);
        let engine = state.engine.clone();
        let router = create_app(state);

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            engine,
        })
    }

    /// Run the server until a shutdown signal arrives, then stop the engine.
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.engine.shutdown();
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
