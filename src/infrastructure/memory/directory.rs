//! In-memory group and user directory.
//!
//! Stands in for the membership and profile collaborators when the service
//! runs without PostgreSQL. Contents come from [`MemoryDirectory::upsert_group`]
//! and friends, or from a JSON seed file.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::domain::{GroupDirectory, GroupId, UserDirectory, UserId};
use crate::shared::error::AppError;

#[derive(Debug, Deserialize)]
struct SeedGroup {
    id: i64,
    members: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedUser {
    email: UserId,
    display_name: Option<String>,
}

/// Seed file layout.
#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    groups: Vec<SeedGroup>,
    #[serde(default)]
    users: Vec<SeedUser>,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    /// Members in join order.
    groups: DashMap<GroupId, Vec<UserId>>,
    display_names: DashMap<UserId, String>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load groups and display names from a JSON seed file.
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Internal(format!("cannot read seed file {}: {}", path.display(), e))
        })?;
        Self::from_seed_json(&raw)
    }

    pub fn from_seed_json(raw: &str) -> Result<Self, AppError> {
        let seed: Seed = serde_json::from_str(raw)
            .map_err(|e| AppError::InvalidArgument(format!("malformed seed: {}", e)))?;

        let directory = Self::new();
        for group in seed.groups {
            directory.upsert_group(GroupId(group.id), group.members);
        }
        for user in seed.users {
            if let Some(name) = user.display_name {
                directory.set_display_name(user.email, name);
            }
        }
        tracing::info!(
            groups = directory.groups.len(),
            users = directory.display_names.len(),
            "Directory seeded"
        );
        Ok(directory)
    }

    /// Create or replace a group's member list. Duplicates are dropped.
    pub fn upsert_group(&self, group: GroupId, members: Vec<UserId>) {
        let mut unique: Vec<UserId> = Vec::with_capacity(members.len());
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }
        self.groups.insert(group, unique);
    }

    pub fn add_member(&self, group: GroupId, user: UserId) {
        let mut members = self.groups.entry(group).or_default();
        if !members.contains(&user) {
            members.push(user);
        }
    }

    pub fn remove_member(&self, group: GroupId, user: &UserId) {
        if let Some(mut members) = self.groups.get_mut(&group) {
            members.retain(|m| m != user);
        }
    }

    pub fn set_display_name(&self, user: UserId, name: impl Into<String>) {
        self.display_names.insert(user, name.into());
    }
}

#[async_trait]
impl GroupDirectory for MemoryDirectory {
    async fn get_members(&self, group: GroupId) -> Result<Vec<UserId>, AppError> {
        self.groups
            .get(&group)
            .map(|members| members.clone())
            .ok_or_else(|| AppError::NotFound(format!("group {}", group)))
    }

    async fn is_member(&self, group: GroupId, user: &UserId) -> Result<bool, AppError> {
        self.groups
            .get(&group)
            .map(|members| members.contains(user))
            .ok_or_else(|| AppError::NotFound(format!("group {}", group)))
    }

    async fn groups_of(&self, user: &UserId) -> Result<Vec<GroupId>, AppError> {
        let mut groups: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|entry| entry.value().contains(user))
            .map(|entry| *entry.key())
            .collect();
        groups.sort();
        Ok(groups)
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn display_name_of(&self, user: &UserId) -> Result<Option<String>, AppError> {
        Ok(self.display_names.get(user).map(|name| name.clone()))
    }
}
