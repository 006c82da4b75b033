//! In-memory backend.
//!
//! The message store and delivery ledger share one [`MemoryDatabase`], the
//! same way the PostgreSQL repositories share one pool.

mod database;
mod delivery_ledger;
mod directory;
mod message_store;

pub use database::MemoryDatabase;
pub use delivery_ledger::MemoryDeliveryLedger;
pub use directory::MemoryDirectory;
pub use message_store::MemoryMessageStore;
