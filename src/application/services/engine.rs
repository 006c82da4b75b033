//! Chat Engine
//!
//! Owns one instance of every engine service. Nothing in the engine is
//! process-global: build as many isolated engines as needed, each over its
//! own store and dispatcher, and shut each down explicitly.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use crate::application::channels::Dispatcher;
use crate::application::services::catch_up::CatchUpReconciler;
use crate::application::services::chat_router::ChatRouter;
use crate::application::services::presence_service::PresenceService;
use crate::application::services::query_service::QueryService;
use crate::application::services::session_registry::SessionRegistry;
use crate::domain::{DeliveryLedger, GroupDirectory, MessageStore, UserDirectory};

/// Storage and collaborator implementations the engine runs over.
#[derive(Clone)]
pub struct EngineBackend {
    pub store: Arc<dyn MessageStore>,
    pub ledger: Arc<dyn DeliveryLedger>,
    pub groups: Arc<dyn GroupDirectory>,
    pub users: Arc<dyn UserDirectory>,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum catch-up passes running at once.
    pub catch_up_concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            catch_up_concurrency: 16,
        }
    }
}

pub struct ChatEngine {
    registry: Arc<SessionRegistry>,
    router: ChatRouter,
    presence: PresenceService,
    queries: QueryService,
    catch_up: Arc<CatchUpReconciler>,
    workers: Arc<Semaphore>,
}

impl ChatEngine {
    pub fn new(backend: EngineBackend, dispatcher: Arc<dyn Dispatcher>, options: EngineOptions) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let workers = Arc::new(Semaphore::new(options.catch_up_concurrency.max(1)));
        let catch_up = Arc::new(CatchUpReconciler::new(
            backend.ledger.clone(),
            backend.groups.clone(),
            dispatcher.clone(),
        ));

        let router = ChatRouter::new(
            backend.store.clone(),
            backend.ledger.clone(),
            backend.groups.clone(),
            backend.users.clone(),
            dispatcher.clone(),
        );
        let presence = PresenceService::new(
            registry.clone(),
            dispatcher,
            catch_up.clone(),
            workers.clone(),
        );
        let queries = QueryService::new(
            backend.store,
            backend.ledger,
            backend.groups,
            backend.users,
            registry.clone(),
        );

        info!(
            catch_up_concurrency = options.catch_up_concurrency,
            "Chat engine started"
        );
        Self {
            registry,
            router,
            presence,
            queries,
            catch_up,
            workers,
        }
    }

    pub fn router(&self) -> &ChatRouter {
        &self.router
    }

    pub fn presence(&self) -> &PresenceService {
        &self.presence
    }

    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn catch_up(&self) -> &CatchUpReconciler {
        &self.catch_up
    }

    /// Stop accepting catch-up work. Passes already running finish; queued
    /// ones are abandoned.
    pub fn shutdown(&self) {
        self.workers.close();
        info!(online = self.registry.online_count(), "Chat engine stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.workers.is_closed()
    }
}
