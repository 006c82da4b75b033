//! WebSocket Gateway
//!
//! Tracks connected sessions and implements [`Dispatcher`] on top of them.
//! Each session owns an unbounded outbound channel drained by its socket
//! writer task, so a send never waits on a slow client.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::messages::{GatewaySend, OpCode};
use crate::application::channels::{Destination, Dispatcher, Topic, UserQueue};
use crate::application::dto::ServerEvent;
use crate::domain::UserId;
use crate::infrastructure::metrics;

/// Topics every session is subscribed to on registration.
const DEFAULT_TOPICS: [Topic; 2] = [Topic::Public, Topic::Presence];

/// A connected, identified session.
#[derive(Debug)]
pub struct ConnectedSession {
    pub user: UserId,
    pub session_id: String,
    sender: mpsc::UnboundedSender<GatewaySend>,
    topics: Mutex<HashSet<Topic>>,
    sequence: AtomicU64,
}

impl ConnectedSession {
    fn send(&self, destination: &Destination, event: &ServerEvent) -> bool {
        let frame = GatewaySend {
            op: OpCode::Dispatch as u8,
            d: Some(event.to_json()),
            s: Some(self.next_sequence()),
            t: Some(event.event_name().to_string()),
            channel: Some(destination.to_string()),
        };
        self.sender.send(frame).is_ok()
    }

    /// Send a frame that is not routed through a queue or topic.
    pub fn send_raw(&self, frame: GatewaySend) -> bool {
        self.sender.send(frame).is_ok()
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct Gateway {
    /// Active sessions by session_id
    sessions: DashMap<String, Arc<ConnectedSession>>,
    /// User to session ids (one user can have multiple sessions)
    user_sessions: DashMap<UserId, Vec<String>>,
    /// Topic to subscribed session ids
    topic_sessions: DashMap<Topic, HashSet<String>>,
    /// Heartbeat interval in milliseconds
    heartbeat_interval_ms: u64,
}

impl Gateway {
    pub fn new(heartbeat_interval_ms: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            user_sessions: DashMap::new(),
            topic_sessions: DashMap::new(),
            heartbeat_interval_ms,
        }
    }

    pub fn heartbeat_interval(&self) -> u64 {
        self.heartbeat_interval_ms
    }

    /// Register an identified session and subscribe it to the default topics.
    pub fn register_session(
        &self,
        session_id: String,
        user: UserId,
        sender: mpsc::UnboundedSender<GatewaySend>,
    ) -> Arc<ConnectedSession> {
        let session = Arc::new(ConnectedSession {
            user: user.clone(),
            session_id: session_id.clone(),
            sender,
            topics: Mutex::new(HashSet::new()),
            sequence: AtomicU64::new(0),
        });

        self.sessions.insert(session_id.clone(), session.clone());
        self.user_sessions
            .entry(user.clone())
            .or_default()
            .push(session_id.clone());
        for topic in DEFAULT_TOPICS {
            self.add_subscription(&session, topic);
        }
        metrics::set_gateway_sessions(self.sessions.len());

        tracing::info!(user = %user, session_id = %session_id, "Session registered");
        session
    }

    pub fn unregister_session(&self, session_id: &str) {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return;
        };

        let topics: Vec<Topic> = session.topics.lock().drain().collect();
        for topic in topics {
            if let Some(mut subscribers) = self.topic_sessions.get_mut(&topic) {
                subscribers.remove(session_id);
            }
            self.topic_sessions
                .remove_if(&topic, |_, subscribers| subscribers.is_empty());
        }

        if let dashmap::mapref::entry::Entry::Occupied(mut entry) =
            self.user_sessions.entry(session.user.clone())
        {
            entry.get_mut().retain(|s| s != session_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        metrics::set_gateway_sessions(self.sessions.len());

        tracing::info!(user = %session.user, session_id = %session_id, "Session unregistered");
    }

    fn add_subscription(&self, session: &ConnectedSession, topic: Topic) {
        if session.topics.lock().insert(topic) {
            self.topic_sessions
                .entry(topic)
                .or_default()
                .insert(session.session_id.clone());
        }
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<ConnectedSession>> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_subscribed(&self, session_id: &str, topic: Topic) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.topics.lock().contains(&topic))
            .unwrap_or(false)
    }

    /// Resolve ids to sessions without holding an index guard while sending.
    fn resolve(&self, session_ids: Vec<String>) -> Vec<Arc<ConnectedSession>> {
        session_ids
            .iter()
            .filter_map(|id| self.sessions.get(id).map(|s| s.clone()))
            .collect()
    }
}

impl Dispatcher for Gateway {
    fn send_to_user(&self, user: &UserId, queue: UserQueue, event: ServerEvent) {
        let ids = self
            .user_sessions
            .get(user)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        if ids.is_empty() {
            tracing::trace!(user = %user, event = event.event_name(), "User offline, not delivered live");
            return;
        }
        let destination = Destination::Queue(queue);
        for session in self.resolve(ids) {
            session.send(&destination, &event);
        }
    }

    fn publish(&self, topic: Topic, event: ServerEvent) {
        let ids: Vec<String> = self
            .topic_sessions
            .get(&topic)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        let destination = Destination::Topic(topic);
        for session in self.resolve(ids) {
            session.send(&destination, &event);
        }
    }

    fn send_to_session(&self, session_id: &str, event: ServerEvent) -> bool {
        match self.session(session_id) {
            Some(session) => session.send(&Destination::Session, &event),
            None => false,
        }
    }

    fn subscribe(&self, session_id: &str, topic: Topic) -> bool {
        match self.session(session_id) {
            Some(session) => {
                self.add_subscription(&session, topic);
                true
            }
            None => false,
        }
    }

    fn unsubscribe(&self, session_id: &str, topic: Topic) {
        let Some(session) = self.session(session_id) else {
            return;
        };
        if session.topics.lock().remove(&topic) {
            if let Some(mut subscribers) = self.topic_sessions.get_mut(&topic) {
                subscribers.remove(session_id);
            }
            self.topic_sessions
                .remove_if(&topic, |_, subscribers| subscribers.is_empty());
        }
    }
}
