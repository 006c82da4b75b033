//! # Domain Layer
//!
//! The domain layer contains the core types of the chat engine.
//! It is independent of any transport or storage concerns.
//!
//! ## Structure
//!
//! - **entities**: messages, delivery state, presence, and the store and
//!   collaborator traits
//! - **value_objects**: identifiers (UserId, GroupId, MessageId, ConversationKey)
//!
//! ## Design Principles
//!
//! - No dependencies on infrastructure or presentation layers
//! - Store traits define data access contracts
//! - Collaborator traits define what the engine consumes from other services

pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::*;
pub use value_objects::*;
