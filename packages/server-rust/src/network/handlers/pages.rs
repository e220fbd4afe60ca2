//! Page API handlers: create, list, read, draft save, publish, claim.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use pagedrop_core::{Page, PageDocument, PageId, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::json;

use super::identity::anonymous_claim;
use super::{ApiError, AppState, Caller};
use crate::config::operation_keys;
use crate::publish::PublishWarning;
use crate::service::{Operation, OperationError, OperationResponse};

/// Body of draft save and publish requests. `document` is kept raw so the
/// document contract parses it exactly once, inside the orchestrator.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DocumentRequest {
    base_server_revision: u64,
    document: Box<RawValue>,
}

impl DocumentRequest {
    fn parse(body: &[u8]) -> Result<(u64, Bytes), ApiError> {
        let req: Self = serde_json::from_slice(body).map_err(|e| ValidationError::Malformed {
            reason: e.to_string(),
        })?;
        Ok((
            req.base_server_revision,
            Bytes::copy_from_slice(req.document.get().as_bytes()),
        ))
    }
}

/// Owner's view of a page.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub id: PageId,
    pub slug: Option<String>,
    pub server_revision: u64,
    pub published_revision: Option<u64>,
    pub is_published: bool,
    pub published_at: Option<i64>,
    pub has_unpublished_changes: bool,
    pub claimed: bool,
    pub draft: PageDocument,
    pub published: Option<PageDocument>,
}

impl From<&Page> for PageView {
    fn from(page: &Page) -> Self {
        Self {
            id: page.id.clone(),
            slug: page.slug.clone(),
            server_revision: page.server_revision,
            published_revision: page.published_revision,
            is_published: page.is_published,
            published_at: page.published_at,
            has_unpublished_changes: page.has_unpublished_changes(),
            claimed: page.user_id.is_some(),
            draft: page.draft_document(),
            published: page.published_document(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse<'a> {
    success: bool,
    slug: &'a str,
    public_url: &'a str,
    server_revision: u64,
    published_revision: u64,
    warnings: &'a [PublishWarning],
}

pub(super) fn unexpected(resp: &OperationResponse) -> ApiError {
    ApiError::Operation(OperationError::Internal(anyhow::anyhow!(
        "unexpected pipeline response: {resp:?}"
    )))
}

fn page_body(page: &Page) -> serde_json::Value {
    json!({ "success": true, "page": PageView::from(page) })
}

/// `POST /api/pages`
pub async fn create_page_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.pipeline.context(operation_keys::CREATE_PAGE, identity);
    match state.dispatch(Operation::CreatePage { ctx }).await? {
        OperationResponse::Page(page) => Ok((StatusCode::CREATED, Json(page_body(&page)))),
        other => Err(unexpected(&other)),
    }
}

/// `GET /api/pages`: summaries of the caller's pages.
pub async fn list_pages_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.pipeline.context(operation_keys::GET_PAGE, identity);
    match state.dispatch(Operation::ListPages { ctx }).await? {
        OperationResponse::Pages(pages) => Ok(Json(json!({ "success": true, "pages": pages }))),
        other => Err(unexpected(&other)),
    }
}

/// `GET /api/pages/{id}`
pub async fn get_page_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.pipeline.context(operation_keys::GET_PAGE, identity);
    let op = Operation::GetPage {
        ctx,
        page_id: PageId::new(id),
    };
    match state.dispatch(op).await? {
        OperationResponse::Page(page) => Ok(Json(page_body(&page))),
        other => Err(unexpected(&other)),
    }
}

/// `PUT /api/pages/{id}/draft`
pub async fn save_draft_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let (base_revision, document) = DocumentRequest::parse(&body)?;
    let ctx = state.pipeline.context(operation_keys::SAVE_DRAFT, identity);
    let op = Operation::SaveDraft {
        ctx,
        page_id: PageId::new(id),
        base_revision,
        document,
    };
    match state.dispatch(op).await? {
        OperationResponse::Draft(outcome) => Ok(Json(json!({
            "success": true,
            "serverRevision": outcome.server_revision,
        }))),
        other => Err(unexpected(&other)),
    }
}

/// `POST /api/pages/{id}/publish`
pub async fn publish_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let (base_revision, document) = DocumentRequest::parse(&body)?;
    let ctx = state.pipeline.context(operation_keys::PUBLISH, identity);
    let op = Operation::Publish {
        ctx,
        page_id: PageId::new(id),
        base_revision,
        document,
    };
    match state.dispatch(op).await? {
        OperationResponse::Published(outcome) => Ok(Json(
            serde_json::to_value(PublishResponse {
                success: true,
                slug: &outcome.slug,
                public_url: &outcome.public_url,
                server_revision: outcome.server_revision,
                published_revision: outcome.published_revision,
                warnings: &outcome.warnings,
            })
            .map_err(|e| ApiError::Operation(OperationError::Internal(e.into())))?,
        )),
        other => Err(unexpected(&other)),
    }
}

/// `POST /api/claim`: moves the caller's anonymous pages to their account.
pub async fn claim_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.is_authenticated() {
        return Err(OperationError::Unauthenticated.into());
    }
    let claim = anonymous_claim(&headers)
        .ok_or_else(|| ApiError::BadRequest("missing anonymous claim".to_string()))?;

    let ctx = state.pipeline.context(operation_keys::CLAIM, identity);
    match state.dispatch(Operation::ClaimOwnership { ctx, claim }).await? {
        OperationResponse::Claimed(outcome) => Ok(Json(json!({
            "success": true,
            "claimed": outcome.claimed,
            "expired": outcome.expired,
        }))),
        other => Err(unexpected(&other)),
    }
}
