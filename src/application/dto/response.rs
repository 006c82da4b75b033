//! Outbound payloads.
//!
//! Timestamps are epoch milliseconds; identities are canonical emails.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    DirectDelivery, GroupId, Message, MessageId, MessageType, PresenceEntry, ReadRecord, UserId,
};

/// Convert a timestamp to epoch milliseconds.
pub fn epoch_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Direct or public chat message as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageDto {
    pub message_id: MessageId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub from: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
    pub timestamp: i64,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
}

impl ChatMessageDto {
    pub fn new(message: &Message, delivery: DirectDelivery) -> Self {
        Self {
            message_id: message.id,
            message_type: message.message_type,
            content: message.content.clone(),
            from: message.sender.clone(),
            to: message.direct_recipient().cloned(),
            timestamp: epoch_ms(message.sent_at),
            delivered: delivery.delivered,
            delivered_at: delivery.delivered_at.map(epoch_ms),
            read_at: delivery.read_at.map(epoch_ms),
        }
    }
}

/// Group message as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageDto {
    pub message_id: MessageId,
    pub group_id: GroupId,
    pub sender: UserId,
    pub sender_name: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

impl GroupMessageDto {
    /// `None` for messages that are not group messages.
    pub fn from_message(message: &Message) -> Option<Self> {
        let group_id = message.group_id()?;
        Some(Self {
            message_id: message.id,
            group_id,
            sender: message.sender.clone(),
            sender_name: message
                .sender_name
                .clone()
                .unwrap_or_else(|| message.sender.to_string()),
            content: message.content.clone(),
            timestamp: epoch_ms(message.sent_at),
            message_type: message.message_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypingEvent {
    pub from: UserId,
    pub to: UserId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTypingEvent {
    pub group_id: GroupId,
    pub from: UserId,
    pub timestamp: i64,
}

/// Updated state of direct messages, sent to their original sender.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagesDeliveredEvent {
    pub messages: Vec<ChatMessageDto>,
}

/// Read receipt sent to the author of the messages that were read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptEvent {
    pub message_id: MessageId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// The reader.
    pub from: UserId,
    pub to: UserId,
    pub timestamp: i64,
    pub delivered: bool,
    pub read_at: i64,
    /// Messages covered by this receipt.
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDeliveryStatus {
    pub message_id: MessageId,
    pub delivered_recipients: BTreeSet<UserId>,
}

/// Aggregate delivery status of one or more messages of a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDeliveryEvent {
    pub group_id: GroupId,
    pub updates: Vec<GroupDeliveryStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRecordDto {
    pub email: UserId,
    pub read_at: i64,
}

impl From<&ReadRecord> for ReadRecordDto {
    fn from(record: &ReadRecord) -> Self {
        Self {
            email: record.recipient.clone(),
            read_at: epoch_ms(record.read_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReadEvent {
    pub group_id: GroupId,
    pub message_id: MessageId,
    pub read_recipients: Vec<ReadRecordDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntryDto {
    pub email: UserId,
    pub online: bool,
    pub last_seen: Option<i64>,
}

impl From<&PresenceEntry> for PresenceEntryDto {
    fn from(entry: &PresenceEntry) -> Self {
        Self {
            email: entry.user.clone(),
            online: entry.online,
            last_seen: entry.last_seen.map(epoch_ms),
        }
    }
}

/// Explicit rejection of an actor's own event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedEvent {
    pub event: String,
    pub code: String,
    pub reason: String,
}

/// Latest message per counterpart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummaryDto {
    pub id: UserId,
    pub name: String,
    pub last_message: String,
    pub last_at: i64,
}

/// Delivery and read rows of a group message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReceiptsDto {
    pub message_id: MessageId,
    pub group_id: GroupId,
    pub delivered_recipients: BTreeSet<UserId>,
    pub read_recipients: Vec<ReadRecordDto>,
}

/// Every event the engine emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "d")]
pub enum ServerEvent {
    #[serde(rename = "MESSAGE")]
    Message(ChatMessageDto),
    #[serde(rename = "PUBLIC_MESSAGE")]
    PublicMessage(ChatMessageDto),
    #[serde(rename = "GROUP_MESSAGE")]
    GroupMessage(GroupMessageDto),
    #[serde(rename = "TYPING")]
    Typing(TypingEvent),
    #[serde(rename = "GROUP_TYPING")]
    GroupTyping(GroupTypingEvent),
    #[serde(rename = "MESSAGES_DELIVERED")]
    MessagesDelivered(MessagesDeliveredEvent),
    #[serde(rename = "READ_RECEIPT")]
    ReadReceipt(ReadReceiptEvent),
    #[serde(rename = "GROUP_DELIVERY")]
    GroupDelivery(GroupDeliveryEvent),
    #[serde(rename = "GROUP_READ")]
    GroupRead(GroupReadEvent),
    #[serde(rename = "PRESENCE_UPDATE")]
    PresenceUpdate(PresenceEntryDto),
    #[serde(rename = "PRESENCE_SNAPSHOT")]
    PresenceSnapshot(Vec<PresenceEntryDto>),
    #[serde(rename = "REJECTED")]
    Rejected(RejectedEvent),
}

impl ServerEvent {
    /// Get the event name for dispatch
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => "MESSAGE",
            ServerEvent::PublicMessage(_) => "PUBLIC_MESSAGE",
            ServerEvent::GroupMessage(_) => "GROUP_MESSAGE",
            ServerEvent::Typing(_) => "TYPING",
            ServerEvent::GroupTyping(_) => "GROUP_TYPING",
            ServerEvent::MessagesDelivered(_) => "MESSAGES_DELIVERED",
            ServerEvent::ReadReceipt(_) => "READ_RECEIPT",
            ServerEvent::GroupDelivery(_) => "GROUP_DELIVERY",
            ServerEvent::GroupRead(_) => "GROUP_READ",
            ServerEvent::PresenceUpdate(_) => "PRESENCE_UPDATE",
            ServerEvent::PresenceSnapshot(_) => "PRESENCE_SNAPSHOT",
            ServerEvent::Rejected(_) => "REJECTED",
        }
    }

    /// Payload only, without the event tag.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("d").map(serde_json::Value::take))
            .unwrap_or_default()
    }
}
