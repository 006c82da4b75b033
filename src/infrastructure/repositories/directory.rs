//! Collaborator Directory Implementation
//!
//! Read-only lookups over the `groups`, `group_members` and `users` tables,
//! which are owned and written by the membership and account services.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::{GroupDirectory, GroupId, UserDirectory, UserId};
use crate::shared::error::AppError;

/// PostgreSQL group membership lookup.
#[derive(Clone)]
pub struct PgGroupDirectory {
    pool: PgPool,
}

impl PgGroupDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_group(&self, group: GroupId) -> Result<(), AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE id = $1)",
        )
        .bind(group.0)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("group {}", group)))
        }
    }
}

#[async_trait]
impl GroupDirectory for PgGroupDirectory {
    async fn get_members(&self, group: GroupId) -> Result<Vec<UserId>, AppError> {
        self.ensure_group(group).await?;
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT user_email FROM group_members
            WHERE group_id = $1
            ORDER BY joined_at ASC, user_email ASC
            "#,
        )
        .bind(group.0)
        .fetch_all(&self.pool)
        .await?;

        // Skip rows the account service stored in a non-canonical shape.
        Ok(rows
            .iter()
            .filter_map(|raw| match UserId::parse(raw) {
                Ok(user) => Some(user),
                Err(_) => {
                    tracing::warn!(group = %group, member = %raw, "Skipping malformed member");
                    None
                }
            })
            .collect())
    }

    async fn is_member(&self, group: GroupId, user: &UserId) -> Result<bool, AppError> {
        self.ensure_group(group).await?;
        let member = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM group_members
                WHERE group_id = $1 AND LOWER(user_email) = $2
            )
            "#,
        )
        .bind(group.0)
        .bind(user.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(member)
    }

    async fn groups_of(&self, user: &UserId) -> Result<Vec<GroupId>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT group_id FROM group_members
            WHERE LOWER(user_email) = $1
            ORDER BY group_id ASC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(GroupId).collect())
    }
}

/// PostgreSQL display-name lookup.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn display_name_of(&self, user: &UserId) -> Result<Option<String>, AppError> {
        let name = sqlx::query_scalar::<_, Option<String>>(
            "SELECT display_name FROM users WHERE LOWER(email) = $1",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(name.flatten())
    }
}
