//! Query Service
//!
//! Synchronous read side: conversation history, sync since a timestamp,
//! conversation summaries, group history and receipts, and presence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::dto::{
    epoch_ms, ChatMessageDto, ConversationSummaryDto, GroupMessageDto, GroupReceiptsDto,
    PresenceEntryDto, ReadRecordDto,
};
use crate::application::services::session_registry::SessionRegistry;
use crate::domain::{
    display_name_or_id, ConversationKey, DeliveryLedger, GroupDirectory, GroupId, Message,
    MessageId, MessageStore, UserDirectory, UserId,
};
use crate::shared::error::AppError;

pub struct QueryService {
    store: Arc<dyn MessageStore>,
    ledger: Arc<dyn DeliveryLedger>,
    groups: Arc<dyn GroupDirectory>,
    users: Arc<dyn UserDirectory>,
    registry: Arc<SessionRegistry>,
}

impl QueryService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        ledger: Arc<dyn DeliveryLedger>,
        groups: Arc<dyn GroupDirectory>,
        users: Arc<dyn UserDirectory>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            store,
            ledger,
            groups,
            users,
            registry,
        }
    }

    /// Attach current delivery state to direct messages.
    async fn with_delivery(&self, messages: Vec<Message>) -> Result<Vec<ChatMessageDto>, AppError> {
        let ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
        let states = self.ledger.direct_states(&ids).await?;
        Ok(messages
            .iter()
            .map(|m| ChatMessageDto::new(m, states.get(&m.id).copied().unwrap_or_default()))
            .collect())
    }

    /// Direct history between `caller` and `other`, oldest first.
    pub async fn direct_history(
        &self,
        caller: &UserId,
        other: &str,
    ) -> Result<Vec<ChatMessageDto>, AppError> {
        let other = UserId::parse(other)?;
        let messages = self
            .store
            .history(&ConversationKey::direct(caller, &other))
            .await?;
        self.with_delivery(messages).await
    }

    /// Direct messages involving `caller` sent strictly after `since_ms`.
    pub async fn sync(&self, caller: &UserId, since_ms: i64) -> Result<Vec<ChatMessageDto>, AppError> {
        let since = DateTime::<Utc>::from_timestamp_millis(since_ms)
            .ok_or_else(|| AppError::InvalidArgument(format!("since out of range: {}", since_ms)))?;
        let messages = self.store.since(caller, since).await?;
        self.with_delivery(messages).await
    }

    /// Latest direct message per counterpart, most recent conversation first.
    pub async fn conversations(&self, caller: &UserId) -> Result<Vec<ConversationSummaryDto>, AppError> {
        let messages = self.store.direct_messages_of(caller).await?;

        // Ascending order, so the last write per counterpart wins.
        let mut latest: HashMap<UserId, Message> = HashMap::new();
        for message in messages {
            let counterpart = if &message.sender == caller {
                message.direct_recipient().cloned()
            } else {
                Some(message.sender.clone())
            };
            if let Some(counterpart) = counterpart {
                latest.insert(counterpart, message);
            }
        }

        let mut summaries = Vec::with_capacity(latest.len());
        for (counterpart, message) in latest {
            summaries.push(ConversationSummaryDto {
                name: display_name_or_id(self.users.as_ref(), &counterpart).await,
                id: counterpart,
                last_message: message.content,
                last_at: epoch_ms(message.sent_at),
            });
        }
        summaries.sort_by(|a, b| b.last_at.cmp(&a.last_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn ensure_member(&self, group: GroupId, user: &UserId) -> Result<(), AppError> {
        if self.groups.is_member(group, user).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("not a member of group {}", group)))
        }
    }

    /// Group history, oldest first. Members only.
    pub async fn group_history(
        &self,
        caller: &UserId,
        group: GroupId,
    ) -> Result<Vec<GroupMessageDto>, AppError> {
        self.ensure_member(group, caller).await?;
        let messages = self.store.history(&ConversationKey::Group(group)).await?;
        Ok(messages.iter().filter_map(GroupMessageDto::from_message).collect())
    }

    /// Delivery and read rows of one group message. Members only.
    pub async fn group_receipts(
        &self,
        caller: &UserId,
        message_id: &str,
    ) -> Result<GroupReceiptsDto, AppError> {
        let id = MessageId::parse(message_id)?;
        let message = self.store.by_id(id).await?;
        let group = message
            .group_id()
            .ok_or_else(|| AppError::NotFound(format!("group message {}", id)))?;
        self.ensure_member(group, caller).await?;

        let delivered_recipients = self.ledger.group_delivered_recipients(id).await?;
        let reads = self.ledger.group_reads(id).await?;
        Ok(GroupReceiptsDto {
            message_id: id,
            group_id: group,
            delivered_recipients,
            read_recipients: reads.iter().map(ReadRecordDto::from).collect(),
        })
    }

    /// Online users first, then offline users with last-seen.
    pub fn presence(&self) -> Vec<PresenceEntryDto> {
        self.registry
            .snapshot()
            .entries()
            .iter()
            .map(PresenceEntryDto::from)
            .collect()
    }
}
