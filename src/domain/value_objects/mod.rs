//! # Domain Value Objects
//!
//! Immutable value types that represent domain concepts without identity.
//!
//! ## Value Objects
//!
//! - **UserId**: canonical, case-insensitive user identity
//! - **GroupId**: group identifier owned by the membership collaborator
//! - **MessageId**: UUID shared by direct and group messages
//! - **ConversationKey**: ordering scope of the message store

mod ids;

pub use ids::*;
