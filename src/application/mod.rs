//! Application Layer
//!
//! The engine's services and data transfer objects. This layer turns
//! inbound realtime events and queries into store/ledger operations and
//! outbound events, without knowing how either travels over the wire.

pub mod channels;
pub mod dto;
pub mod services;
