//! Anonymous-to-authenticated ownership claims.
//!
//! A claim moves every page still owned by an anonymous token, unpublished and
//! not yet assigned to a user, over to the authenticated user. Running it
//! again finds nothing left to move, so retried auth callbacks are harmless.
//! Published pages are never reassigned.

use std::sync::Arc;

use pagedrop_core::context::ANONYMOUS_TOKEN_PREFIX;
use pagedrop_core::{AnonymousClaim, CallerIdentity, Clock, PageId, ValidationError};
use serde::Serialize;

use crate::config::ClaimConfig;
use crate::storage::{PageStore, StoreError};

/// Errors from [`OwnershipClaims::claim`].
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("ownership claims require an authenticated user")]
    Unauthenticated,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a claim. An empty `claimed` list is still a success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub claimed: Vec<PageId>,
    /// The token was too old to claim anything.
    pub expired: bool,
}

/// Applies ownership claims against the revision store.
pub struct OwnershipClaims {
    store: Arc<dyn PageStore>,
    clock: Arc<dyn Clock>,
    config: ClaimConfig,
}

impl OwnershipClaims {
    #[must_use]
    pub fn new(store: Arc<dyn PageStore>, clock: Arc<dyn Clock>, config: ClaimConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Transfers the anonymous pages named by `claim` to the caller.
    ///
    /// Does not advance `server_revision`: the document is unchanged, and a
    /// client holding the page open must still be able to save against the
    /// revision it already has.
    ///
    /// # Errors
    ///
    /// [`ClaimError::Unauthenticated`] without a user id, a validation error
    /// for a malformed token, or a store failure.
    pub async fn claim(
        &self,
        identity: &CallerIdentity,
        claim: &AnonymousClaim,
    ) -> Result<ClaimOutcome, ClaimError> {
        let user_id = identity
            .user_id
            .as_deref()
            .ok_or(ClaimError::Unauthenticated)?;
        claim.validate()?;

        let now = self.clock.now_millis();
        if claim.is_expired(now, self.config.max_claim_age_ms) {
            tracing::info!(user_id, issued_at = claim.issued_at, "ignoring expired ownership claim");
            return Ok(ClaimOutcome {
                claimed: Vec::new(),
                expired: true,
            });
        }

        let claimed = self
            .store
            .claim_anonymous(&claim.token, user_id, now)
            .await?;
        metrics::counter!("pagedrop_claimed_pages_total").increment(claimed.len() as u64);
        if !claimed.is_empty() {
            tracing::info!(user_id, pages = claimed.len(), "anonymous pages claimed");
        }
        Ok(ClaimOutcome {
            claimed,
            expired: false,
        })
    }

    /// Starts an anonymous session: a fresh token stamped with the current
    /// time, which the client keeps and later presents as its claim.
    #[must_use]
    pub fn start_anonymous_session(&self) -> AnonymousClaim {
        let claim = issue_anonymous_claim(self.clock.as_ref());
        metrics::counter!("pagedrop_anonymous_sessions_total").increment(1);
        claim
    }
}

/// Mints a fresh anonymous claim. When to rotate tokens is up to the caller.
#[must_use]
pub fn issue_anonymous_claim(clock: &dyn Clock) -> AnonymousClaim {
    AnonymousClaim {
        token: format!("{ANONYMOUS_TOKEN_PREFIX}{}", uuid::Uuid::new_v4().simple()),
        issued_at: clock.now_millis(),
    }
}
