//! User profiles.
//!
//! The only profile field the server acts on is the username: it seeds the
//! slugs of pages the user publishes, so it must be slug-shaped and unique
//! across users. Identity itself comes from the fronting auth layer.

use std::sync::Arc;

use pagedrop_core::slug::is_valid_slug;
use pagedrop_core::{CallerIdentity, User, ValidationError};

use crate::storage::{PageStore, StoreError};

/// Errors from [`Accounts`].
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("profiles require an authenticated user")]
    Unauthenticated,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("username already taken: {0}")]
    UsernameTaken(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reads and updates user records in the revision store.
pub struct Accounts {
    store: Arc<dyn PageStore>,
}

impl Accounts {
    #[must_use]
    pub fn new(store: Arc<dyn PageStore>) -> Self {
        Self { store }
    }

    /// Sets the caller's username, creating the user record on first use.
    ///
    /// Slugs already committed keep their value; only later first publishes
    /// are seeded from the new username.
    ///
    /// # Errors
    ///
    /// [`AccountError::Unauthenticated`] without a user id,
    /// [`ValidationError::InvalidUsername`] unless `username` is a valid slug,
    /// [`AccountError::UsernameTaken`] when another user holds it.
    pub async fn set_username(
        &self,
        identity: &CallerIdentity,
        username: &str,
    ) -> Result<User, AccountError> {
        let user_id = identity
            .user_id
            .as_deref()
            .ok_or(AccountError::Unauthenticated)?;
        if !is_valid_slug(username) {
            return Err(ValidationError::InvalidUsername {
                value: username.to_string(),
            }
            .into());
        }

        let user = match self.store.get_user(user_id).await? {
            Some(existing) => User {
                username: Some(username.to_string()),
                ..existing
            },
            None => User {
                id: user_id.to_string(),
                username: Some(username.to_string()),
                auth_subject: user_id.to_string(),
            },
        };
        if !self.store.put_user(&user).await? {
            return Err(AccountError::UsernameTaken(username.to_string()));
        }
        tracing::info!(user_id, username, "username updated");
        Ok(user)
    }

    /// The caller's user record, if one has been saved.
    ///
    /// # Errors
    ///
    /// [`AccountError::Unauthenticated`] or a store failure.
    pub async fn profile(&self, identity: &CallerIdentity) -> Result<Option<User>, AccountError> {
        let user_id = identity
            .user_id
            .as_deref()
            .ok_or(AccountError::Unauthenticated)?;
        Ok(self.store.get_user(user_id).await?)
    }
}
