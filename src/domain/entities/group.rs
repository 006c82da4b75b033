//! Group membership lookup.
//!
//! Group lifecycle belongs to a collaborator service; the engine only reads
//! a membership snapshot per operation.

use async_trait::async_trait;

use crate::domain::value_objects::{GroupId, UserId};
use crate::shared::error::AppError;

/// Read-only view of group membership.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Current members in membership order. `NotFound` for unknown groups.
    async fn get_members(&self, group: GroupId) -> Result<Vec<UserId>, AppError>;

    /// `NotFound` for unknown groups.
    async fn is_member(&self, group: GroupId, user: &UserId) -> Result<bool, AppError>;

    /// Groups `user` currently belongs to.
    async fn groups_of(&self, user: &UserId) -> Result<Vec<GroupId>, AppError>;
}
