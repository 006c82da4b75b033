//! User-facing collaborator seams: identity resolution and display names.

use async_trait::async_trait;

use crate::domain::value_objects::UserId;
use crate::shared::error::AppError;

/// Resolves a connection credential into a verified, canonical identity.
///
/// Credentials are issued elsewhere; implementations only verify them.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, credential: &str) -> Result<UserId, AppError>;
}

/// Display-name lookup, used only for cosmetic labelling.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when the user has no profile.
    async fn display_name_of(&self, user: &UserId) -> Result<Option<String>, AppError>;
}

/// Display name of `user`, falling back to the identifier on any failure.
pub async fn display_name_or_id(directory: &dyn UserDirectory, user: &UserId) -> String {
    match directory.display_name_of(user).await {
        Ok(Some(name)) if !name.trim().is_empty() => name,
        Ok(_) => user.to_string(),
        Err(e) => {
            tracing::debug!(user = %user, error = %e, "Display name lookup failed");
            user.to_string()
        }
    }
}
