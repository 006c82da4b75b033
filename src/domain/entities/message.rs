//! Message entity and store trait.
//!
//! Direct, group and public messages live in one append-only store keyed by
//! [`MessageId`]. Re-inserting an existing id is a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{ConversationKey, GroupId, MessageId, UserId};
use crate::shared::error::AppError;

/// Message kinds carried over the realtime channels.
///
/// Only `Chat` and `System` messages are ever persisted; the remaining kinds
/// label synthetic or ephemeral frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Chat,
    Join,
    Leave,
    Typing,
    ReadReceipt,
    Presence,
    System,
}

impl MessageType {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "JOIN" => Self::Join,
            "LEAVE" => Self::Leave,
            "TYPING" => Self::Typing,
            "READ_RECEIPT" => Self::ReadReceipt,
            "PRESENCE" => Self::Presence,
            "SYSTEM" => Self::System,
            _ => Self::Chat,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::Join => "JOIN",
            Self::Leave => "LEAVE",
            Self::Typing => "TYPING",
            Self::ReadReceipt => "READ_RECEIPT",
            Self::Presence => "PRESENCE",
            Self::System => "SYSTEM",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Addressee of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    User(UserId),
    Group(GroupId),
    /// Public broadcast channel.
    Public,
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub recipient: Recipient,
    /// Display name of the sender at send time (group messages).
    pub sender_name: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn conversation_key(&self) -> ConversationKey {
        match &self.recipient {
            Recipient::User(to) => ConversationKey::direct(&self.sender, to),
            Recipient::Group(id) => ConversationKey::Group(*id),
            Recipient::Public => ConversationKey::Public,
        }
    }

    /// Recipient identity of a direct message.
    pub fn direct_recipient(&self) -> Option<&UserId> {
        match &self.recipient {
            Recipient::User(to) => Some(to),
            _ => None,
        }
    }

    pub fn group_id(&self) -> Option<GroupId> {
        match &self.recipient {
            Recipient::Group(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.recipient, Recipient::User(_))
    }

    /// Whether `user` took part in this direct message.
    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender == user || self.direct_recipient() == Some(user)
    }
}

/// Outcome of an idempotent append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreResult {
    /// `false` when a message with the same id already existed.
    pub inserted: bool,
}

/// Append-only message store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert the message unless its id already exists.
    async fn append(&self, message: &Message) -> Result<StoreResult, AppError>;

    /// All messages of a conversation, ascending by `sent_at`.
    async fn history(&self, key: &ConversationKey) -> Result<Vec<Message>, AppError>;

    /// Direct messages sent or received by `user` strictly after `since`,
    /// ascending by `sent_at`.
    async fn since(&self, user: &UserId, since: DateTime<Utc>) -> Result<Vec<Message>, AppError>;

    /// Every direct message sent or received by `user`, ascending by `sent_at`.
    async fn direct_messages_of(&self, user: &UserId) -> Result<Vec<Message>, AppError>;

    /// Fetch one message, `NotFound` if unknown.
    async fn by_id(&self, id: MessageId) -> Result<Message, AppError>;
}
