//! Catch-Up Reconciler
//!
//! Runs once per offline -> online transition. Every direct message addressed
//! to the user that is still undelivered gets marked delivered and its sender
//! is told; every group message the user missed gets a delivery row and the
//! group's delivery topic gets the new aggregate.
//!
//! Notifications are built only from rows this pass actually changed, so a
//! second run with nothing new sends nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::application::channels::{Dispatcher, Topic, UserQueue};
use crate::application::dto::{
    ChatMessageDto, GroupDeliveryEvent, GroupDeliveryStatus, MessagesDeliveredEvent, ServerEvent,
};
use crate::domain::{DeliveryLedger, GroupDirectory, GroupId, Message, UserId};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// What one catch-up pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    pub direct_delivered: usize,
    pub group_delivered: usize,
    /// One `MESSAGES_DELIVERED` batch was sent to each of these senders.
    pub senders_notified: usize,
    /// One `GROUP_DELIVERY` batch was published to each of these groups.
    pub groups_notified: usize,
}

impl CatchUpReport {
    pub fn is_empty(&self) -> bool {
        self.direct_delivered == 0 && self.group_delivered == 0
    }
}

pub struct CatchUpReconciler {
    ledger: Arc<dyn DeliveryLedger>,
    groups: Arc<dyn GroupDirectory>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl CatchUpReconciler {
    pub fn new(
        ledger: Arc<dyn DeliveryLedger>,
        groups: Arc<dyn GroupDirectory>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            ledger,
            groups,
            dispatcher,
        }
    }

    #[tracing::instrument(skip(self), fields(user = %user))]
    pub async fn run(&self, user: &UserId) -> Result<CatchUpReport, AppError> {
        let mut report = CatchUpReport::default();
        // Both halves run even if one fails; the first error is returned.
        let direct = self.reconcile_direct(user, &mut report).await;
        if let Err(e) = &direct {
            warn!(error = %e, "Direct catch-up failed");
        }
        let groups = self.reconcile_groups(user, &mut report).await;
        if let Err(e) = &groups {
            warn!(error = %e, "Group catch-up failed");
        }

        metrics::record_catch_up("direct", report.direct_delivered);
        metrics::record_catch_up("group", report.group_delivered);
        debug!(?report, "Catch-up finished");
        direct.and(groups).map(|_| report)
    }

    async fn reconcile_direct(&self, user: &UserId, report: &mut CatchUpReport) -> Result<(), AppError> {
        let pending = self.ledger.undelivered_direct(user).await?;
        if pending.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut by_sender: BTreeMap<UserId, Vec<Message>> = BTreeMap::new();
        for message in pending {
            match self.ledger.mark_delivered(message.id, now).await {
                Ok(true) => by_sender.entry(message.sender.clone()).or_default().push(message),
                // A concurrent ack got there first and already notified.
                Ok(false) => {}
                Err(e) => warn!(message_id = %message.id, error = %e, "Catch-up delivery failed"),
            }
        }

        for (sender, messages) in by_sender {
            let ids: Vec<_> = messages.iter().map(|m| m.id).collect();
            let states = self.ledger.direct_states(&ids).await?;
            let dtos: Vec<ChatMessageDto> = messages
                .iter()
                .map(|m| ChatMessageDto::new(m, states.get(&m.id).copied().unwrap_or_default()))
                .collect();

            report.direct_delivered += dtos.len();
            report.senders_notified += 1;
            self.dispatcher.send_to_user(
                &sender,
                UserQueue::Messages,
                ServerEvent::MessagesDelivered(MessagesDeliveredEvent { messages: dtos }),
            );
        }
        Ok(())
    }

    async fn reconcile_groups(&self, user: &UserId, report: &mut CatchUpReport) -> Result<(), AppError> {
        let groups = self.groups.groups_of(user).await?;
        if groups.is_empty() {
            return Ok(());
        }
        let pending = self.ledger.undelivered_group(user, &groups).await?;

        let now = Utc::now();
        let mut by_group: BTreeMap<GroupId, Vec<GroupDeliveryStatus>> = BTreeMap::new();
        for message in pending {
            let Some(group) = message.group_id() else {
                continue;
            };
            match self.ledger.mark_group_delivered(message.id, user, now).await {
                Ok(update) if update.inserted => {
                    by_group.entry(group).or_default().push(GroupDeliveryStatus {
                        message_id: message.id,
                        delivered_recipients: update.recipients,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(message_id = %message.id, error = %e, "Catch-up group delivery failed"),
            }
        }

        for (group_id, updates) in by_group {
            report.group_delivered += updates.len();
            report.groups_notified += 1;
            self.dispatcher.publish(
                Topic::GroupDelivery(group_id),
                ServerEvent::GroupDelivery(GroupDeliveryEvent { group_id, updates }),
            );
        }
        Ok(())
    }
}
