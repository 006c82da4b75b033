//! Session Registry
//!
//! Reference-counts live connections per user. A user is online while at
//! least one session is open; the entry is removed when the count returns to
//! zero and the user is stamped with a last-seen time.
//!
//! Every operation locks only the shard holding the user's entry, so
//! unrelated users never serialize against each other.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::{PresenceSnapshot, UserId};

/// Outcome of a connect registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTransition {
    /// The count went from 0 to 1.
    pub is_first_session: bool,
    pub active_sessions: usize,
}

/// Outcome of a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectTransition {
    /// The user still has other sessions open.
    StillOnline { active_sessions: usize },
    /// The last session closed.
    NowOffline { last_seen: DateTime<Utc> },
    /// The user had no entry; nothing changed.
    Unknown,
}

impl DisconnectTransition {
    pub fn is_now_offline(&self) -> bool {
        matches!(self, DisconnectTransition::NowOffline { .. })
    }
}

/// Per-user session counts and last-seen stamps.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, usize>,
    last_seen: DashMap<UserId, DateTime<Utc>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, user: &UserId) -> ConnectTransition {
        self.connect_with(user, |_| {})
    }

    /// Register a session and run `on_transition` while the user's entry is
    /// still locked, so per-user side effects happen in transition order.
    ///
    /// `on_transition` must not call back into this registry.
    pub fn connect_with<F>(&self, user: &UserId, on_transition: F) -> ConnectTransition
    where
        F: FnOnce(&ConnectTransition),
    {
        let mut count = self.sessions.entry(user.clone()).or_insert(0);
        *count += 1;
        let transition = ConnectTransition {
            is_first_session: *count == 1,
            active_sessions: *count,
        };
        on_transition(&transition);
        transition
    }

    pub fn disconnect(&self, user: &UserId) -> DisconnectTransition {
        self.disconnect_at(user, Utc::now())
    }

    /// Like [`disconnect`](Self::disconnect) with an explicit timestamp.
    pub fn disconnect_at(&self, user: &UserId, now: DateTime<Utc>) -> DisconnectTransition {
        self.disconnect_with(user, now, |_| {})
    }

    /// Close a session, running `on_transition` under the user's entry lock.
    /// Same contract as [`connect_with`](Self::connect_with).
    pub fn disconnect_with<F>(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
        on_transition: F,
    ) -> DisconnectTransition
    where
        F: FnOnce(&DisconnectTransition),
    {
        match self.sessions.entry(user.clone()) {
            Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.last_seen.insert(user.clone(), now);
                    let transition = DisconnectTransition::NowOffline { last_seen: now };
                    on_transition(&transition);
                    entry.remove();
                    transition
                } else {
                    let transition = DisconnectTransition::StillOnline {
                        active_sessions: *count,
                    };
                    on_transition(&transition);
                    transition
                }
            }
            Entry::Vacant(_) => {
                let transition = DisconnectTransition::Unknown;
                on_transition(&transition);
                transition
            }
        }
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.sessions.get(user).map(|c| *c > 0).unwrap_or(false)
    }

    pub fn active_sessions(&self, user: &UserId) -> usize {
        self.sessions.get(user).map(|c| *c).unwrap_or(0)
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn last_seen(&self, user: &UserId) -> Option<DateTime<Utc>> {
        if self.is_online(user) {
            return None;
        }
        self.last_seen.get(user).map(|at| *at)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        let online: std::collections::BTreeSet<UserId> =
            self.sessions.iter().map(|e| e.key().clone()).collect();
        let last_seen = self
            .last_seen
            .iter()
            .filter(|e| !online.contains(e.key()))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        PresenceSnapshot { online, last_seen }
    }
}
