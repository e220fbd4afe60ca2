//! Publish results, warnings and errors.

use std::fmt;

use pagedrop_core::{PageId, ValidationError};
use serde::Serialize;

use crate::storage::StoreError;

/// Non-fatal condition attached to an otherwise successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PublishWarning {
    /// No artifact was stored; the page is served dynamically.
    DegradedArtifact { reason: String },
    /// A cache purge failed or only partially applied.
    Invalidation { reason: String },
    /// Production deployment without any purge backend.
    InvalidationUnconfigured,
}

impl fmt::Display for PublishWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegradedArtifact { reason } => write!(
                f,
                "artifact storage unavailable ({reason}); page will be served dynamically"
            ),
            Self::Invalidation { reason } => write!(f, "cache invalidation failed: {reason}"),
            Self::InvalidationUnconfigured => {
                f.write_str("no cache invalidation configured; cached copies may be stale")
            }
        }
    }
}

/// Successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub page_id: PageId,
    pub slug: String,
    pub public_url: String,
    /// `None` when the page was committed in degraded mode.
    pub artifact_key: Option<String>,
    pub server_revision: u64,
    pub published_revision: u64,
    pub warnings: Vec<PublishWarning>,
}

/// Successful draft save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftOutcome {
    pub page_id: PageId,
    pub server_revision: u64,
}

/// Errors from page mutations. None of them leave a partial state change
/// behind: everything before the CAS commit is side-effect free from the
/// revision store's point of view.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("request carries neither a user id nor an anonymous token")]
    MissingIdentity,
    #[error("page not found: {0}")]
    NotFound(PageId),
    #[error("caller does not own page {0}")]
    Forbidden(PageId),
    #[error("revision conflict, current revision is {current_revision}")]
    Conflict { current_revision: u64 },
    #[error("artifact storage unavailable: {reason}")]
    StorageUnavailable { reason: String },
    #[error("could not reserve a slug for page {0}")]
    SlugUnavailable(PageId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PublishError {
    /// Stable label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::MissingIdentity => "missing_identity",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict { .. } => "conflict",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::SlugUnavailable(_) => "slug_unavailable",
            Self::Store(_) => "store",
        }
    }
}
