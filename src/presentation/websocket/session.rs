//! WebSocket Session Management

use std::time::{Duration, Instant};

/// Per-connection liveness state, owned by the connection task.
#[derive(Debug)]
pub struct SessionState {
    pub session_id: String,
    pub last_heartbeat: Instant,
}

impl SessionState {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() < timeout
    }
}
