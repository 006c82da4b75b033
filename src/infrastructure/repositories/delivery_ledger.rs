//! Delivery Ledger Implementation
//!
//! Direct delivery state lives on the `chat_messages` row itself and only
//! moves forward through guarded `UPDATE`s. Group delivery and read rows are
//! keyed by `(message_id, recipient)` and inserted with `ON CONFLICT DO
//! NOTHING`; the read table's foreign key enforces read-implies-delivered.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::message_store::{into_messages, MessageRow, MESSAGE_COLUMNS};
use crate::domain::{
    DeliveryLedger, DirectDelivery, GroupDeliveryUpdate, GroupId, GroupReadUpdate, Message,
    MessageId, ReadRecord, UserId,
};
use crate::infrastructure::metrics::record_db_query;
use crate::shared::error::AppError;

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    id: Uuid,
    delivered: bool,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
}

impl DeliveryRow {
    fn state(&self) -> DirectDelivery {
        DirectDelivery {
            delivered: self.delivered,
            delivered_at: self.delivered_at,
            read_at: self.read_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReadRow {
    recipient: String,
    read_at: DateTime<Utc>,
}

/// PostgreSQL delivery/read ledger.
#[derive(Clone)]
pub struct PgDeliveryLedger {
    pool: PgPool,
}

impl PgDeliveryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `NotFound` unless `id` is a stored group message.
    async fn ensure_group_message(
        tx: &mut Transaction<'_, Postgres>,
        id: MessageId,
    ) -> Result<(), AppError> {
        let group = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT group_id FROM chat_messages WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;

        match group {
            Some(Some(_)) => Ok(()),
            _ => Err(AppError::NotFound(format!("group message {}", id))),
        }
    }

    async fn insert_delivery(
        tx: &mut Transaction<'_, Postgres>,
        id: MessageId,
        recipient: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO group_message_deliveries (message_id, recipient, delivered_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, recipient) DO NOTHING
            "#,
        )
        .bind(id.as_uuid())
        .bind(recipient.as_str())
        .bind(at)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delivered_recipients<'e, E>(executor: E, id: MessageId) -> Result<BTreeSet<UserId>, AppError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT recipient FROM group_message_deliveries WHERE message_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_all(executor)
        .await?;

        rows.iter().map(|r| stored_user(r)).collect()
    }

    async fn read_records<'e, E>(executor: E, id: MessageId) -> Result<Vec<ReadRecord>, AppError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_as::<_, ReadRow>(
            r#"
            SELECT recipient, read_at
            FROM group_message_reads
            WHERE message_id = $1
            ORDER BY recipient ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(executor)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ReadRecord {
                    recipient: stored_user(&row.recipient)?,
                    read_at: row.read_at,
                })
            })
            .collect()
    }
}

fn stored_user(raw: &str) -> Result<UserId, AppError> {
    UserId::parse(raw).map_err(|_| AppError::Internal(format!("corrupt identity in ledger: {}", raw)))
}

#[async_trait]
impl DeliveryLedger for PgDeliveryLedger {
    async fn mark_delivered(&self, id: MessageId, at: DateTime<Utc>) -> Result<bool, AppError> {
        let started = Instant::now();
        let updated = sqlx::query(
            r#"
            UPDATE chat_messages
            SET delivered = TRUE, delivered_at = $2
            WHERE id = $1 AND recipient IS NOT NULL AND NOT delivered
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;
        record_db_query("update", "chat_messages", started.elapsed().as_secs_f64());

        if updated.rows_affected() == 1 {
            return Ok(true);
        }
        // Zero rows: either already delivered or not a direct message at all.
        self.direct_state(id).await.map(|_| false)
    }

    async fn mark_read(
        &self,
        reader: &UserId,
        counterparty: &UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, AppError> {
        let started = Instant::now();
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            WITH updated AS (
                UPDATE chat_messages
                SET delivered = TRUE,
                    delivered_at = COALESCE(delivered_at, $3),
                    read_at = $3
                WHERE recipient = $1 AND sender = $2 AND read_at IS NULL
                RETURNING id, sent_at, seq
            )
            SELECT id FROM updated ORDER BY sent_at ASC, seq ASC
            "#,
        )
        .bind(reader.as_str())
        .bind(counterparty.as_str())
        .bind(at)
        .fetch_all(&self.pool)
        .await?;
        record_db_query("update", "chat_messages", started.elapsed().as_secs_f64());

        Ok(ids.into_iter().map(MessageId::from).collect())
    }

    async fn direct_state(&self, id: MessageId) -> Result<DirectDelivery, AppError> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, delivered, delivered_at, read_at
            FROM chat_messages
            WHERE id = $1 AND recipient IS NOT NULL
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.state())
            .ok_or_else(|| AppError::NotFound(format!("direct message {}", id)))
    }

    async fn direct_states(
        &self,
        ids: &[MessageId],
    ) -> Result<HashMap<MessageId, DirectDelivery>, AppError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(MessageId::as_uuid).collect();
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, delivered, delivered_at, read_at
            FROM chat_messages
            WHERE id = ANY($1) AND recipient IS NOT NULL
            "#,
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (MessageId::from(row.id), row.state()))
            .collect())
    }

    async fn undelivered_direct(&self, recipient: &UserId) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM chat_messages
            WHERE recipient = $1 AND NOT delivered
            ORDER BY sent_at ASC, seq ASC
            "#
        ))
        .bind(recipient.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn undelivered_group(
        &self,
        recipient: &UserId,
        groups: &[GroupId],
    ) -> Result<Vec<Message>, AppError> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let group_ids: Vec<i64> = groups.iter().map(|g| g.0).collect();
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM chat_messages m
            WHERE m.group_id = ANY($2)
              AND m.sender <> $1
              AND NOT EXISTS (
                  SELECT 1 FROM group_message_deliveries d
                  WHERE d.message_id = m.id AND d.recipient = $1
              )
            ORDER BY m.sent_at ASC, m.seq ASC
            "#
        ))
        .bind(recipient.as_str())
        .bind(&group_ids)
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn mark_group_delivered(
        &self,
        id: MessageId,
        recipient: &UserId,
        at: DateTime<Utc>,
    ) -> Result<GroupDeliveryUpdate, AppError> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        Self::ensure_group_message(&mut tx, id).await?;
        let inserted = Self::insert_delivery(&mut tx, id, recipient, at).await?;
        let recipients = Self::delivered_recipients(&mut *tx, id).await?;
        tx.commit().await?;
        record_db_query("insert", "group_message_deliveries", started.elapsed().as_secs_f64());

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
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        Self::ensure_group_message(&mut tx, id).await?;
        let delivery_synthesized = Self::insert_delivery(&mut tx, id, recipient, at).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO group_message_reads (message_id, recipient, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, recipient) DO NOTHING
            "#,
        )
        .bind(id.as_uuid())
        .bind(recipient.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let reads = Self::read_records(&mut *tx, id).await?;
        tx.commit().await?;
        record_db_query("insert", "group_message_reads", started.elapsed().as_secs_f64());

        Ok(GroupReadUpdate {
            delivery_synthesized,
            inserted,
            reads,
        })
    }

    async fn group_delivered_recipients(&self, id: MessageId) -> Result<BTreeSet<UserId>, AppError> {
        Self::delivered_recipients(&self.pool, id).await
    }

    async fn group_reads(&self, id: MessageId) -> Result<Vec<ReadRecord>, AppError> {
        Self::read_records(&self.pool, id).await
    }
}
