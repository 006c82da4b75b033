//! # Domain Entities
//!
//! Core domain entities of the presence and delivery-tracking engine.
//!
//! ## Core Entities
//!
//! - **Message**: a direct, group or public chat message
//! - **DirectDelivery**: forward-only delivered/read state of a direct message
//! - **ReadRecord**: per-recipient read row of a group message
//! - **PresenceSnapshot**: online users plus last-seen stamps
//!
//! ## Store and Collaborator Traits
//!
//! `MessageStore` and `DeliveryLedger` are implemented in the infrastructure
//! layer. `GroupDirectory`, `UserDirectory` and `IdentityResolver` are
//! consumed from collaborator services and only read.

mod delivery;
mod group;
mod message;
mod presence;
mod user;

pub use delivery::{DeliveryLedger, DirectDelivery, GroupDeliveryUpdate, GroupReadUpdate, ReadRecord};
pub use group::GroupDirectory;
pub use message::{Message, MessageStore, MessageType, Recipient, StoreResult};
pub use presence::{PresenceEntry, PresenceSnapshot};
pub use user::{display_name_or_id, IdentityResolver, UserDirectory};

#[cfg(test)]
pub use delivery::MockDeliveryLedger;
#[cfg(test)]
pub use group::MockGroupDirectory;
#[cfg(test)]
pub use user::{MockIdentityResolver, MockUserDirectory};
