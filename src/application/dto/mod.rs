//! Data Transfer Objects
//!
//! Inbound realtime events and query parameters (`request`), and every
//! payload the engine sends back out (`response`).

pub mod request;
pub mod response;

pub use request::*;
pub use response::*;
