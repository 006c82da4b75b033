//! Memory-backed delivery/read ledger.

use std::collections::btree_map::Entry as RowEntry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::database::MemoryDatabase;
use crate::domain::{
    ConversationKey, DeliveryLedger, DirectDelivery, GroupDeliveryUpdate, GroupId,
    GroupReadUpdate, Message, MessageId, ReadRecord, UserId,
};
use crate::shared::error::AppError;

pub struct MemoryDeliveryLedger {
    db: Arc<MemoryDatabase>,
}

impl MemoryDeliveryLedger {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }

    fn group_message(&self, id: MessageId) -> Result<Message, AppError> {
        self.db
            .message(&id)
            .filter(|m| m.group_id().is_some())
            .ok_or_else(|| AppError::NotFound(format!("group message {}", id)))
    }

    /// Insert the delivery row if absent; returns whether it was inserted.
    fn insert_group_delivery(
        &self,
        id: MessageId,
        recipient: &UserId,
        at: DateTime<Utc>,
    ) -> (bool, BTreeSet<UserId>) {
        let mut rows = self.db.group_deliveries.entry(id).or_default();
        let inserted = match rows.entry(recipient.clone()) {
            RowEntry::Vacant(slot) => {
                slot.insert(at);
                true
            }
            RowEntry::Occupied(_) => false,
        };
        (inserted, rows.keys().cloned().collect())
    }

    fn has_group_delivery(&self, id: &MessageId, recipient: &UserId) -> bool {
        self.db
            .group_deliveries
            .get(id)
            .map(|rows| rows.contains_key(recipient))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DeliveryLedger for MemoryDeliveryLedger {
    async fn mark_delivered(&self, id: MessageId, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self
            .db
            .direct_delivery
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("direct message {}", id)))?;
        Ok(state.mark_delivered(at))
    }

    async fn mark_read(
        &self,
        reader: &UserId,
        counterparty: &UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, AppError> {
        let ids = self.db.ids_of(&self.db.inbox, reader);
        let mut changed = Vec::new();
        for message in self.db.sorted_messages(&ids) {
            if &message.sender != counterparty {
                continue;
            }
            if let Some(mut state) = self.db.direct_delivery.get_mut(&message.id) {
                if state.mark_read(at) {
                    changed.push(message.id);
                }
            }
        }
        Ok(changed)
    }

    async fn direct_state(&self, id: MessageId) -> Result<DirectDelivery, AppError> {
        self.db
            .direct_delivery
            .get(&id)
            .map(|s| *s)
            .ok_or_else(|| AppError::NotFound(format!("direct message {}", id)))
    }

    async fn direct_states(
        &self,
        ids: &[MessageId],
    ) -> Result<HashMap<MessageId, DirectDelivery>, AppError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.db.direct_delivery.get(id).map(|s| (*id, *s)))
            .collect())
    }

    async fn undelivered_direct(&self, recipient: &UserId) -> Result<Vec<Message>, AppError> {
        let ids = self.db.ids_of(&self.db.inbox, recipient);
        Ok(self
            .db
            .sorted_messages(&ids)
            .into_iter()
            .filter(|m| {
                self.db
                    .direct_delivery
                    .get(&m.id)
                    .map(|s| !s.delivered)
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn undelivered_group(
        &self,
        recipient: &UserId,
        groups: &[GroupId],
    ) -> Result<Vec<Message>, AppError> {
        let ids: Vec<MessageId> = groups
            .iter()
            .flat_map(|g| self.db.ids_of(&self.db.conversations, &ConversationKey::Group(*g)))
            .collect();
        Ok(self
            .db
            .sorted_messages(&ids)
            .into_iter()
            .filter(|m| &m.sender != recipient && !self.has_group_delivery(&m.id, recipient))
            .collect())
    }

    async fn mark_group_delivered(
        &self,
        id: MessageId,
        recipient: &UserId,
        at: DateTime<Utc>,
    ) -> Result<GroupDeliveryUpdate, AppError> {
        self.group_message(id)?;
        let (inserted, recipients) = self.insert_group_delivery(id, recipient, at);
        Ok(GroupDeliveryUpdate {
            inserted,
            recipients,
        })
    }

    async fn mark_group_read(
        &self,
        id: MessageId,
        recipient: &UserId,
        at: DateTime<Utc>,
    ) -> Result<GroupReadUpdate, AppError> {
        self.group_message(id)?;
        let (delivery_synthesized, _) = self.insert_group_delivery(id, recipient, at);

        let mut rows = self.db.group_reads.entry(id).or_default();
        let inserted = match rows.entry(recipient.clone()) {
            RowEntry::Vacant(slot) => {
                slot.insert(at);
                true
            }
            RowEntry::Occupied(_) => false,
        };
        let reads = rows
            .iter()
            .map(|(user, read_at)| ReadRecord {
                recipient: user.clone(),
                read_at: *read_at,
            })
            .collect();

        Ok(GroupReadUpdate {
            delivery_synthesized,
            inserted,
            reads,
        })
    }

    async fn group_delivered_recipients(&self, id: MessageId) -> Result<BTreeSet<UserId>, AppError> {
        Ok(self
            .db
            .group_deliveries
            .get(&id)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn group_reads(&self, id: MessageId) -> Result<Vec<ReadRecord>, AppError> {
        Ok(self
            .db
            .group_reads
            .get(&id)
            .map(|rows| {
                rows.iter()
                    .map(|(user, read_at)| ReadRecord {
                        recipient: user.clone(),
                        read_at: *read_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageStore, MessageType, Recipient};
    use crate::infrastructure::memory::MemoryMessageStore;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn message(from: &str, recipient: Recipient, sent_at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::generate(),
            sender: user(from),
            recipient,
            sender_name: None,
            content: "hello".into(),
            message_type: MessageType::Chat,
            sent_at,
        }
    }

    fn backend() -> (MemoryMessageStore, MemoryDeliveryLedger) {
        let db = Arc::new(MemoryDatabase::new());
        (
            MemoryMessageStore::new(db.clone()),
            MemoryDeliveryLedger::new(db),
        )
    }

    #[tokio::test]
    async fn test_mark_delivered_is_idempotent() {
        let (store, ledger) = backend();
        let m = message("a@x.com", Recipient::User(user("b@x.com")), Utc::now());
        store.append(&m).await.unwrap();

        let t1 = Utc::now();
        assert!(ledger.mark_delivered(m.id, t1).await.unwrap());
        assert!(!ledger.mark_delivered(m.id, t1 + Duration::seconds(1)).await.unwrap());

        let state = ledger.direct_state(m.id).await.unwrap();
        assert!(state.delivered);
        assert_eq!(state.delivered_at, Some(t1));
    }

    #[tokio::test]
    async fn test_mark_delivered_unknown_message() {
        let (_, ledger) = backend();
        let result = ledger.mark_delivered(MessageId::generate(), Utc::now()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_read_batches_only_counterparty_messages() {
        let (store, ledger) = backend();
        let t0 = Utc::now();
        let from_a1 = message("a@x.com", Recipient::User(user("b@x.com")), t0);
        let from_a2 = message("a@x.com", Recipient::User(user("b@x.com")), t0 + Duration::seconds(1));
        let from_c = message("c@x.com", Recipient::User(user("b@x.com")), t0);
        let to_a = message("b@x.com", Recipient::User(user("a@x.com")), t0);
        for m in [&from_a1, &from_a2, &from_c, &to_a] {
            store.append(m).await.unwrap();
        }

        let read_at = t0 + Duration::seconds(30);
        let changed = ledger
            .mark_read(&user("b@x.com"), &user("a@x.com"), read_at)
            .await
            .unwrap();
        assert_eq!(changed, vec![from_a1.id, from_a2.id]);

        for id in [from_a1.id, from_a2.id] {
            let state = ledger.direct_state(id).await.unwrap();
            assert!(state.delivered);
            assert_eq!(state.read_at, Some(read_at));
        }
        assert!(!ledger.direct_state(from_c.id).await.unwrap().is_read());
        assert!(!ledger.direct_state(to_a.id).await.unwrap().is_read());

        // A second batch finds nothing left to read.
        let again = ledger
            .mark_read(&user("b@x.com"), &user("a@x.com"), read_at)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_group_delivery_accumulates_monotonically() {
        let (store, ledger) = backend();
        let m = message("a@x.com", Recipient::Group(GroupId(1)), Utc::now());
        store.append(&m).await.unwrap();

        let first = ledger
            .mark_group_delivered(m.id, &user("b@x.com"), Utc::now())
            .await
            .unwrap();
        assert!(first.inserted);
        assert_eq!(first.recipients, BTreeSet::from([user("b@x.com")]));

        let repeat = ledger
            .mark_group_delivered(m.id, &user("b@x.com"), Utc::now())
            .await
            .unwrap();
        assert!(!repeat.inserted);
        assert_eq!(repeat.recipients, first.recipients);

        let second = ledger
            .mark_group_delivered(m.id, &user("c@x.com"), Utc::now())
            .await
            .unwrap();
        assert_eq!(
            second.recipients,
            BTreeSet::from([user("b@x.com"), user("c@x.com")])
        );
    }

    #[tokio::test]
    async fn test_group_read_synthesizes_delivery() {
        let (store, ledger) = backend();
        let m = message("a@x.com", Recipient::Group(GroupId(1)), Utc::now());
        store.append(&m).await.unwrap();

        let update = ledger
            .mark_group_read(m.id, &user("c@x.com"), Utc::now())
            .await
            .unwrap();
        assert!(update.delivery_synthesized);
        assert!(update.inserted);
        assert_eq!(update.reads.len(), 1);

        let delivered = ledger.group_delivered_recipients(m.id).await.unwrap();
        assert!(delivered.contains(&user("c@x.com")));

        let again = ledger
            .mark_group_read(m.id, &user("c@x.com"), Utc::now())
            .await
            .unwrap();
        assert!(!again.delivery_synthesized);
        assert!(!again.inserted);
        assert_eq!(again.reads, update.reads);
    }

    #[tokio::test]
    async fn test_group_ack_on_direct_message_is_not_found() {
        let (store, ledger) = backend();
        let m = message("a@x.com", Recipient::User(user("b@x.com")), Utc::now());
        store.append(&m).await.unwrap();

        let result = ledger.mark_group_delivered(m.id, &user("b@x.com"), Utc::now()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_undelivered_group_excludes_own_and_acknowledged() {
        let (store, ledger) = backend();
        let t0 = Utc::now();
        let own = message("b@x.com", Recipient::Group(GroupId(1)), t0);
        let acked = message("a@x.com", Recipient::Group(GroupId(1)), t0);
        let pending = message("a@x.com", Recipient::Group(GroupId(1)), t0 + Duration::seconds(1));
        let other_group = message("a@x.com", Recipient::Group(GroupId(2)), t0);
        for m in [&own, &acked, &pending, &other_group] {
            store.append(m).await.unwrap();
        }
        ledger
            .mark_group_delivered(acked.id, &user("b@x.com"), t0)
            .await
            .unwrap();

        let result = ledger
            .undelivered_group(&user("b@x.com"), &[GroupId(1)])
            .await
            .unwrap();
        assert_eq!(result.iter().map(|m| m.id).collect::<Vec<_>>(), vec![pending.id]);
    }
}
