//! Operation types dispatched through the pipeline.

use std::time::Duration;

use bytes::Bytes;
use pagedrop_core::{AnonymousClaim, CallerIdentity, Page, PageId, PageSummary, User, ValidationError};

use crate::accounts::AccountError;
use crate::config::operation_keys;
use crate::ownership::{ClaimError, ClaimOutcome};
use crate::publish::{DraftOutcome, PublishError, PublishOutcome, RenderedPage};
use crate::storage::StoreError;

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    /// One of [`operation_keys`]; drives quotas and metric labels.
    pub operation: &'static str,
    pub identity: CallerIdentity,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    #[must_use]
    pub fn new(
        call_id: u64,
        operation: &'static str,
        identity: CallerIdentity,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            call_id,
            operation,
            identity,
            call_timeout_ms,
        }
    }
}

/// Typed operation variants dispatched through the pipeline.
#[derive(Debug)]
pub enum Operation {
    CreatePage {
        ctx: OperationContext,
    },
    GetPage {
        ctx: OperationContext,
        page_id: PageId,
    },
    /// Summaries of the caller's own pages.
    ListPages {
        ctx: OperationContext,
    },
    SaveDraft {
        ctx: OperationContext,
        page_id: PageId,
        base_revision: u64,
        /// Raw JSON document, parsed and validated by the orchestrator.
        document: Bytes,
    },
    Publish {
        ctx: OperationContext,
        page_id: PageId,
        base_revision: u64,
        document: Bytes,
    },
    ClaimOwnership {
        ctx: OperationContext,
        claim: AnonymousClaim,
    },
    /// Mints a new anonymous token.
    StartSession {
        ctx: OperationContext,
    },
    GetProfile {
        ctx: OperationContext,
    },
    SetUsername {
        ctx: OperationContext,
        username: String,
    },
    /// Dynamic fallback rendering of a published page.
    ServePublished {
        ctx: OperationContext,
        slug: String,
    },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Self::CreatePage { ctx }
            | Self::ListPages { ctx }
            | Self::StartSession { ctx }
            | Self::GetProfile { ctx }
            | Self::SetUsername { ctx, .. }
            | Self::GetPage { ctx, .. }
            | Self::SaveDraft { ctx, .. }
            | Self::Publish { ctx, .. }
            | Self::ClaimOwnership { ctx, .. }
            | Self::ServePublished { ctx, .. } => ctx,
        }
    }

    /// Operation key a variant is expected to carry.
    #[must_use]
    pub fn default_key(&self) -> &'static str {
        match self {
            Self::CreatePage { .. } => operation_keys::CREATE_PAGE,
            Self::GetPage { .. }
            | Self::ListPages { .. }
            | Self::GetProfile { .. }
            | Self::ServePublished { .. } => operation_keys::GET_PAGE,
            Self::SaveDraft { .. } => operation_keys::SAVE_DRAFT,
            Self::Publish { .. } => operation_keys::PUBLISH,
            Self::ClaimOwnership { .. } => operation_keys::CLAIM,
            Self::StartSession { .. } => operation_keys::START_SESSION,
            Self::SetUsername { .. } => operation_keys::UPDATE_PROFILE,
        }
    }
}

/// Successful response from the page service.
#[derive(Debug)]
pub enum OperationResponse {
    Page(Box<Page>),
    Pages(Vec<PageSummary>),
    Draft(DraftOutcome),
    Published(Box<PublishOutcome>),
    Claimed(ClaimOutcome),
    Session(AnonymousClaim),
    /// `None` when the user has never saved a profile.
    Profile(Option<User>),
    Rendered(RenderedPage),
    /// Nothing published at the requested slug.
    NotPublished,
}

/// Errors returned by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("authentication required")]
    Unauthenticated,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    /// A unique value (such as a username) is held by someone else.
    #[error("{0}")]
    AlreadyExists(String),
    #[error("revision conflict, current revision is {current_revision}")]
    Conflict { current_revision: u64 },
    #[error("artifact storage unavailable: {reason}")]
    StorageUnavailable { reason: String },
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { limit: u32, retry_after: Duration },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for OperationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PageNotFound(id) => Self::NotFound(format!("page not found: {id}")),
            StoreError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            other => Self::Internal(other.into()),
        }
    }
}

impl From<PublishError> for OperationError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::Validation(v) => Self::Validation(v),
            PublishError::MissingIdentity => Self::Unauthenticated,
            e @ PublishError::NotFound(_) => Self::NotFound(e.to_string()),
            e @ PublishError::Forbidden(_) => Self::Forbidden(e.to_string()),
            PublishError::Conflict { current_revision } => Self::Conflict { current_revision },
            PublishError::StorageUnavailable { reason } => Self::StorageUnavailable { reason },
            e @ PublishError::SlugUnavailable(_) => Self::Internal(e.into()),
            PublishError::Store(s) => s.into(),
        }
    }
}

impl From<ClaimError> for OperationError {
    fn from(e: ClaimError) -> Self {
        match e {
            ClaimError::Unauthenticated => Self::Unauthenticated,
            ClaimError::Validation(v) => Self::Validation(v),
            ClaimError::Store(s) => s.into(),
        }
    }
}

impl From<AccountError> for OperationError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Unauthenticated => Self::Unauthenticated,
            AccountError::Validation(v) => Self::Validation(v),
            e @ AccountError::UsernameTaken(_) => Self::AlreadyExists(e.to_string()),
            AccountError::Store(s) => s.into(),
        }
    }
}
