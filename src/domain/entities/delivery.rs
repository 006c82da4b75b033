//! Delivery and read state.
//!
//! Direct messages carry a single forward-only state record. Group messages
//! keep one delivery row and at most one read row per recipient; a read row
//! never exists without its delivery row.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::entities::Message;
use crate::domain::value_objects::{GroupId, MessageId, UserId};
use crate::shared::error::AppError;

/// Delivery state of a direct message.
///
/// Moves only forward: undelivered -> delivered -> read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DirectDelivery {
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl DirectDelivery {
    /// Returns `true` if this call performed the transition.
    pub fn mark_delivered(&mut self, at: DateTime<Utc>) -> bool {
        if self.delivered {
            return false;
        }
        self.delivered = true;
        self.delivered_at = Some(at);
        true
    }

    /// Read implies delivered. Returns `true` if this call performed the transition.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.read_at.is_some() {
            return false;
        }
        self.mark_delivered(at);
        self.read_at = Some(at);
        true
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// A `(message, recipient)` read row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadRecord {
    pub recipient: UserId,
    pub read_at: DateTime<Utc>,
}

/// Result of inserting a group delivery row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDeliveryUpdate {
    /// `false` if the row already existed.
    pub inserted: bool,
    /// Every recipient with a delivery row for the message.
    pub recipients: BTreeSet<UserId>,
}

/// Result of inserting a group read row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReadUpdate {
    /// The delivery row was missing and had to be created first.
    pub delivery_synthesized: bool,
    /// `false` if the read row already existed.
    pub inserted: bool,
    /// Every read row for the message, ordered by recipient.
    pub reads: Vec<ReadRecord>,
}

/// Per-message, per-recipient delivery/read ledger.
///
/// Every mutation is insert-if-absent on its key, so retries and duplicate
/// events are harmless.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Mark a direct message delivered. `NotFound` for unknown ids.
    async fn mark_delivered(&self, id: MessageId, at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Batch-mark every unread message from `counterparty` to `reader` as
    /// delivered and read, stamping one `read_at` for the batch. Returns the
    /// ids that changed.
    async fn mark_read(
        &self,
        reader: &UserId,
        counterparty: &UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, AppError>;

    /// Current state of one direct message.
    async fn direct_state(&self, id: MessageId) -> Result<DirectDelivery, AppError>;

    /// Current state of several direct messages; unknown ids are omitted.
    async fn direct_states(
        &self,
        ids: &[MessageId],
    ) -> Result<HashMap<MessageId, DirectDelivery>, AppError>;

    /// Direct messages addressed to `recipient` that are not yet delivered,
    /// ascending by `sent_at`.
    async fn undelivered_direct(&self, recipient: &UserId) -> Result<Vec<Message>, AppError>;

    /// Group messages in `groups`, sent by someone other than `recipient`,
    /// without a delivery row for `recipient`, ascending by `sent_at`.
    async fn undelivered_group(
        &self,
        recipient: &UserId,
        groups: &[GroupId],
    ) -> Result<Vec<Message>, AppError>;

    async fn mark_group_delivered(
        &self,
        id: MessageId,
        recipient: &UserId,
        at: DateTime<Utc>,
    ) -> Result<GroupDeliveryUpdate, AppError>;

    /// Ensures the delivery row exists before inserting the read row.
    async fn mark_group_read(
        &self,
        id: MessageId,
        recipient: &UserId,
        at: DateTime<Utc>,
    ) -> Result<GroupReadUpdate, AppError>;

    async fn group_delivered_recipients(&self, id: MessageId) -> Result<BTreeSet<UserId>, AppError>;

    async fn group_reads(&self, id: MessageId) -> Result<Vec<ReadRecord>, AppError>;
}
