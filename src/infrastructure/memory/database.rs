//! In-memory tables shared by the memory-backed store and ledger.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::{ConversationKey, DirectDelivery, Message, MessageId, UserId};

/// A message plus its insertion sequence, used to break `sent_at` ties.
#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub message: Message,
    pub seq: u64,
}

/// Sharded tables of the in-memory backend.
///
/// No code path holds a guard on one table while locking another, except
/// `append`, which always locks `messages` before `direct_delivery`.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    pub(crate) messages: DashMap<MessageId, StoredMessage>,
    pub(crate) seq: AtomicU64,
    pub(crate) conversations: DashMap<ConversationKey, Vec<MessageId>>,
    /// Direct messages by sender and by recipient.
    pub(crate) participants: DashMap<UserId, Vec<MessageId>>,
    /// Direct messages by recipient.
    pub(crate) inbox: DashMap<UserId, Vec<MessageId>>,
    pub(crate) direct_delivery: DashMap<MessageId, DirectDelivery>,
    pub(crate) group_deliveries: DashMap<MessageId, BTreeMap<UserId, DateTime<Utc>>>,
    pub(crate) group_reads: DashMap<MessageId, BTreeMap<UserId, DateTime<Utc>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Ids indexed under `key` in `index`, cloned out of the shard.
    pub(crate) fn ids_of<K>(&self, index: &DashMap<K, Vec<MessageId>>, key: &K) -> Vec<MessageId>
    where
        K: std::hash::Hash + Eq,
    {
        index.get(key).map(|ids| ids.clone()).unwrap_or_default()
    }

    /// Resolve ids to messages ordered by `sent_at`, then insertion order.
    pub(crate) fn sorted_messages(&self, ids: &[MessageId]) -> Vec<Message> {
        let mut stored: Vec<StoredMessage> = ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .collect();
        stored.sort_by(|a, b| {
            a.message
                .sent_at
                .cmp(&b.message.sent_at)
                .then(a.seq.cmp(&b.seq))
        });
        stored.into_iter().map(|s| s.message).collect()
    }

    pub(crate) fn message(&self, id: &MessageId) -> Option<Message> {
        self.messages.get(id).map(|m| m.message.clone())
    }

    /// Number of stored messages.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
