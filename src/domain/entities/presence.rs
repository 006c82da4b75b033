//! Presence snapshot types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::domain::value_objects::UserId;

/// One user's presence as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user: UserId,
    pub online: bool,
    /// Only set for offline users.
    pub last_seen: Option<DateTime<Utc>>,
}

/// Point-in-time presence of all known users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub online: BTreeSet<UserId>,
    /// Last-seen stamps of users that are currently offline.
    pub last_seen: BTreeMap<UserId, DateTime<Utc>>,
}

impl PresenceSnapshot {
    /// Online users first, then offline users with their last-seen stamp.
    pub fn entries(&self) -> Vec<PresenceEntry> {
        let online = self.online.iter().map(|user| PresenceEntry {
            user: user.clone(),
            online: true,
            last_seen: None,
        });
        let offline = self
            .last_seen
            .iter()
            .filter(|(user, _)| !self.online.contains(*user))
            .map(|(user, at)| PresenceEntry {
                user: user.clone(),
                online: false,
                last_seen: Some(*at),
            });
        online.chain(offline).collect()
    }
}
