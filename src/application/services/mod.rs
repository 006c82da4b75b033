//! Application Services
//!
//! Services that coordinate the engine's domain operations.
//!
//! ## Available Services
//!
//! - **SessionRegistry**: per-user session counts and last-seen stamps
//! - **CatchUpReconciler**: backfills deliveries missed while offline
//! - **ChatRouter**: one handler per inbound realtime event
//! - **PresenceService**: presence broadcasts and catch-up scheduling
//! - **QueryService**: history, sync, receipts and presence reads
//! - **ChatEngine**: owns one instance of each of the above

pub mod catch_up;
pub mod chat_router;
pub mod engine;
pub mod presence_service;
pub mod query_service;
pub mod session_registry;

pub use catch_up::{CatchUpReconciler, CatchUpReport};
pub use chat_router::{ChatRouter, EventContext};
pub use engine::{ChatEngine, EngineBackend, EngineOptions};
pub use presence_service::{Connected, PresenceService};
pub use query_service::QueryService;
pub use session_registry::{ConnectTransition, DisconnectTransition, SessionRegistry};
