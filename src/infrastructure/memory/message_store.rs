//! Memory-backed message store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;

use super::database::{MemoryDatabase, StoredMessage};
use crate::domain::{
    ConversationKey, DirectDelivery, Message, MessageId, MessageStore, StoreResult, UserId,
};
use crate::shared::error::AppError;

pub struct MemoryMessageStore {
    db: Arc<MemoryDatabase>,
}

impl MemoryMessageStore {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: &Message) -> Result<StoreResult, AppError> {
        match self.db.messages.entry(message.id) {
            Entry::Occupied(_) => return Ok(StoreResult { inserted: false }),
            Entry::Vacant(slot) => {
                if message.is_direct() {
                    self.db
                        .direct_delivery
                        .insert(message.id, DirectDelivery::default());
                }
                slot.insert(StoredMessage {
                    message: message.clone(),
                    seq: self.db.next_seq(),
                });
            }
        }

        self.db
            .conversations
            .entry(message.conversation_key())
            .or_default()
            .push(message.id);

        if let Some(recipient) = message.direct_recipient() {
            self.db
                .inbox
                .entry(recipient.clone())
                .or_default()
                .push(message.id);
            self.db
                .participants
                .entry(message.sender.clone())
                .or_default()
                .push(message.id);
            if recipient != &message.sender {
                self.db
                    .participants
                    .entry(recipient.clone())
                    .or_default()
                    .push(message.id);
            }
        }

        Ok(StoreResult { inserted: true })
    }

    async fn history(&self, key: &ConversationKey) -> Result<Vec<Message>, AppError> {
        let ids = self.db.ids_of(&self.db.conversations, key);
        Ok(self.db.sorted_messages(&ids))
    }

    async fn since(&self, user: &UserId, since: DateTime<Utc>) -> Result<Vec<Message>, AppError> {
        let ids = self.db.ids_of(&self.db.participants, user);
        Ok(self
            .db
            .sorted_messages(&ids)
            .into_iter()
            .filter(|m| m.sent_at > since)
            .collect())
    }

    async fn direct_messages_of(&self, user: &UserId) -> Result<Vec<Message>, AppError> {
        let ids = self.db.ids_of(&self.db.participants, user);
        Ok(self.db.sorted_messages(&ids))
    }

    async fn by_id(&self, id: MessageId) -> Result<Message, AppError> {
        self.db
            .message(&id)
            .ok_or_else(|| AppError::NotFound(format!("message {}", id)))
    }
}
