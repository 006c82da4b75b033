//! Presence Service
//!
//! Turns session registry transitions into presence broadcasts and starts
//! the catch-up pass when a user comes online.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::channels::{Dispatcher, Topic};
use crate::application::dto::{PresenceEntryDto, ServerEvent};
use crate::application::services::catch_up::CatchUpReconciler;
use crate::application::services::session_registry::{
    ConnectTransition, DisconnectTransition, SessionRegistry,
};
use crate::domain::{PresenceEntry, PresenceSnapshot, UserId};
use crate::infrastructure::metrics;

/// Result of registering a new session.
#[derive(Debug)]
pub struct Connected {
    pub transition: ConnectTransition,
    /// Catch-up task, only started on the offline -> online transition.
    pub catch_up: Option<JoinHandle<()>>,
}

pub struct PresenceService {
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    catch_up: Arc<CatchUpReconciler>,
    /// Bounds concurrent catch-up passes. Closed on shutdown.
    workers: Arc<Semaphore>,
}

impl PresenceService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
        catch_up: Arc<CatchUpReconciler>,
        workers: Arc<Semaphore>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            catch_up,
            workers,
        }
    }

    /// Register a session. The registration is visible to [`snapshot`](Self::snapshot)
    /// as soon as this returns.
    ///
    /// Presence updates for one user are published under that user's registry
    /// entry, so subscribers see them in the same order as the transitions.
    pub fn connect(&self, user: &UserId) -> Connected {
        let transition = self.registry.connect_with(user, |transition| {
            if transition.is_first_session {
                self.publish_presence(user, true, None);
            }
        });
        metrics::set_online_users(self.registry.online_count());

        if !transition.is_first_session {
            debug!(user = %user, sessions = transition.active_sessions, "Additional session");
            return Connected {
                transition,
                catch_up: None,
            };
        }

        info!(user = %user, "User online");
        Connected {
            transition,
            catch_up: Some(self.spawn_catch_up(user.clone())),
        }
    }

    pub fn disconnect(&self, user: &UserId) -> DisconnectTransition {
        let transition = self.registry.disconnect_with(user, Utc::now(), |transition| {
            if let DisconnectTransition::NowOffline { last_seen } = transition {
                self.publish_presence(user, false, Some(*last_seen));
            }
        });
        metrics::set_online_users(self.registry.online_count());

        match transition {
            DisconnectTransition::NowOffline { .. } => {
                info!(user = %user, "User offline");
            }
            DisconnectTransition::StillOnline { active_sessions } => {
                debug!(user = %user, sessions = active_sessions, "Session closed");
            }
            DisconnectTransition::Unknown => {
                warn!(user = %user, "Disconnect for user without sessions");
            }
        }
        transition
    }

    fn publish_presence(&self, user: &UserId, online: bool, last_seen: Option<DateTime<Utc>>) {
        self.dispatcher.publish(
            Topic::Presence,
            ServerEvent::PresenceUpdate(PresenceEntryDto::from(&PresenceEntry {
                user: user.clone(),
                online,
                last_seen,
            })),
        );
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.registry.is_online(user)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.registry.snapshot()
    }

    /// Send the current snapshot to one session.
    pub fn send_snapshot(&self, session_id: &str) -> bool {
        let entries = self
            .snapshot()
            .entries()
            .iter()
            .map(PresenceEntryDto::from)
            .collect();
        self.dispatcher
            .send_to_session(session_id, ServerEvent::PresenceSnapshot(entries))
    }

    fn spawn_catch_up(&self, user: UserId) -> JoinHandle<()> {
        let workers = self.workers.clone();
        let catch_up = self.catch_up.clone();
        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                debug!(user = %user, "Engine shut down, skipping catch-up");
                return;
            };
            match catch_up.run(&user).await {
                Ok(report) if !report.is_empty() => {
                    info!(
                        user = %user,
                        direct = report.direct_delivered,
                        group = report.group_delivered,
                        "Caught up missed deliveries"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(user = %user, error = %e, "Catch-up failed"),
            }
        })
    }
}
