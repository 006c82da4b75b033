//! Identifier value objects.
//!
//! Users are identified by their canonical (trimmed, lower-cased) email
//! address. Messages share one UUID id space across direct and group
//! conversations so acknowledgements can reference either kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::shared::error::AppError;

/// Reserved identity used as the author of synthetic messages.
pub const SYSTEM_USER: &str = "system";

/// Canonical user identity (case-insensitive email).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Canonicalize and validate a raw identifier.
    ///
    /// `" Alice@Example.COM "` and `"alice@example.com"` resolve to the same
    /// identity. Anything that is not email-shaped is rejected with
    /// `InvalidArgument`, except the reserved `system` identity.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let canonical = raw.trim().to_lowercase();
        if canonical.is_empty() {
            return Err(AppError::InvalidArgument("user id must not be empty".into()));
        }
        if canonical != SYSTEM_USER && !canonical.validate_email() {
            return Err(AppError::InvalidArgument(format!(
                "malformed user id: {}",
                canonical
            )));
        }
        Ok(Self(canonical))
    }

    /// The reserved system identity.
    pub fn system() -> Self {
        Self(SYSTEM_USER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_USER
    }
}

impl TryFrom<String> for UserId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Group identifier, owned by the group membership collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl GroupId {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        raw.trim()
            .parse::<i64>()
            .map(GroupId)
            .map_err(|_| AppError::InvalidArgument(format!("malformed group id: {}", raw)))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Server-assigned id (time-ordered UUIDv7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse a client-supplied id.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| AppError::InvalidArgument(format!("malformed message id: {}", raw)))
    }

    /// Use the client-supplied id when present and non-blank, otherwise assign one.
    pub fn parse_or_generate(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(str::trim) {
            Some(s) if !s.is_empty() => Self::parse(s),
            _ => Ok(Self::generate()),
        }
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of an ordered conversation in the message store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    /// One-to-one conversation; the pair is stored in canonical order.
    Direct(UserId, UserId),
    Group(GroupId),
    Public,
}

impl ConversationKey {
    pub fn direct(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self::Direct(a.clone(), b.clone())
        } else {
            Self::Direct(b.clone(), a.clone())
        }
    }

    /// Flat string form, used as the storage column value.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Direct(a, b) => format!("direct:{}|{}", a, b),
            Self::Group(id) => format!("group:{}", id),
            Self::Public => "public".to_string(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}
