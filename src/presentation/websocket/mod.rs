//! WebSocket Gateway
//!
//! Real-time communication via WebSocket connections.

pub mod gateway;
pub mod handler;
pub mod messages;
pub mod session;

pub use gateway::{ConnectedSession, Gateway};
pub use handler::{open_session, ws_handler, OpenedSession};
pub use messages::{GatewayReceive, GatewaySend, OpCode};
pub use session::SessionState;
