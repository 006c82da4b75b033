//! Message Store Implementation
//!
//! PostgreSQL implementation of the append-only message store. Appends are
//! `INSERT .. ON CONFLICT DO NOTHING`, so client retries with the same id
//! are absorbed by the primary key.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    ConversationKey, GroupId, Message, MessageId, MessageStore, MessageType, Recipient,
    StoreResult, UserId,
};
use crate::infrastructure::metrics::record_db_query;
use crate::shared::error::AppError;

/// Column list shared by every message query.
pub(super) const MESSAGE_COLUMNS: &str =
    "id, sender, recipient, group_id, sender_name, content, message_type, sent_at";

/// Database row of `chat_messages`.
#[derive(Debug, sqlx::FromRow)]
pub(super) struct MessageRow {
    id: Uuid,
    sender: String,
    recipient: Option<String>,
    group_id: Option<i64>,
    sender_name: Option<String>,
    content: String,
    message_type: String,
    sent_at: DateTime<Utc>,
}

impl MessageRow {
    /// Rows hold canonical identities; a row that fails to parse is corrupt.
    pub(super) fn into_message(self) -> Result<Message, AppError> {
        let recipient = match (self.recipient, self.group_id) {
            (Some(to), _) => Recipient::User(stored_user(&to)?),
            (None, Some(group)) => Recipient::Group(GroupId(group)),
            (None, None) => Recipient::Public,
        };
        Ok(Message {
            id: MessageId::from(self.id),
            sender: stored_user(&self.sender)?,
            recipient,
            sender_name: self.sender_name,
            content: self.content,
            message_type: MessageType::from_str(&self.message_type),
            sent_at: self.sent_at,
        })
    }
}

fn stored_user(raw: &str) -> Result<UserId, AppError> {
    UserId::parse(raw).map_err(|_| AppError::Internal(format!("corrupt identity in store: {}", raw)))
}

pub(super) fn into_messages(rows: Vec<MessageRow>) -> Result<Vec<Message>, AppError> {
    rows.into_iter().map(MessageRow::into_message).collect()
}

/// PostgreSQL message store.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: &Message) -> Result<StoreResult, AppError> {
        let started = Instant::now();
        let (recipient, group_id) = match &message.recipient {
            Recipient::User(to) => (Some(to.as_str()), None),
            Recipient::Group(id) => (None, Some(id.0)),
            Recipient::Public => (None, None),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO chat_messages
                (id, conversation_key, sender, recipient, group_id, sender_name,
                 content, message_type, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(message.conversation_key().storage_key())
        .bind(message.sender.as_str())
        .bind(recipient)
        .bind(group_id)
        .bind(message.sender_name.as_deref())
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(message.sent_at)
        .execute(&self.pool)
        .await?;

        record_db_query("insert", "chat_messages", started.elapsed().as_secs_f64());
        Ok(StoreResult {
            inserted: result.rows_affected() == 1,
        })
    }

    async fn history(&self, key: &ConversationKey) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM chat_messages
            WHERE conversation_key = $1
            ORDER BY sent_at ASC, seq ASC
            "#
        ))
        .bind(key.storage_key())
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn since(&self, user: &UserId, since: DateTime<Utc>) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM chat_messages
            WHERE recipient IS NOT NULL
              AND (sender = $1 OR recipient = $1)
              AND sent_at > $2
            ORDER BY sent_at ASC, seq ASC
            "#
        ))
        .bind(user.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn direct_messages_of(&self, user: &UserId) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM chat_messages
            WHERE recipient IS NOT NULL
              AND (sender = $1 OR recipient = $1)
            ORDER BY sent_at ASC, seq ASC
            "#
        ))
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn by_id(&self, id: MessageId) -> Result<Message, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| AppError::NotFound(format!("message {}", id)))?
            .into_message()
    }
}
