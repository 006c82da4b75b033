//! Repository Implementations
//!
//! PostgreSQL implementations of the domain store traits and read-only
//! views over the collaborator tables.
//!
//! ## Available Repositories
//!
//! - **PgMessageStore** - append-only message log with conversation indexes
//! - **PgDeliveryLedger** - direct delivery state plus group delivery/read rows
//! - **PgGroupDirectory** - group membership lookups
//! - **PgUserDirectory** - display names
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use sqlx::PgPool;
//! use crate::infrastructure::repositories::{PgDeliveryLedger, PgMessageStore};
//!
//! async fn setup_repositories(pool: PgPool) {
//!     let store = PgMessageStore::new(pool.clone());
//!     let ledger = PgDeliveryLedger::new(pool);
//! }
//! ```

pub mod delivery_ledger;
pub mod directory;
pub mod message_store;

pub use delivery_ledger::PgDeliveryLedger;
pub use directory::{PgGroupDirectory, PgUserDirectory};
pub use message_store::PgMessageStore;
