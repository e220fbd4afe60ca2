//! Dynamic fallback serving of published pages at `/p/{slug}`.
//!
//! The edge normally serves the uploaded artifact; this route renders the
//! published snapshot when it misses. Responses carry a short `max-age` so a
//! failed purge heals on its own.

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};

use super::{ApiError, AppState, Caller};
use crate::config::operation_keys;
use crate::service::{Operation, OperationResponse};

pub const PUBLISHED_REVISION_HEADER: &str = "x-published-revision";

/// `GET /p/{slug}` and `GET /p/{slug}/`
pub async fn serve_page_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let ctx = state.pipeline.context(operation_keys::GET_PAGE, identity);
    let op = Operation::ServePublished { ctx, slug };

    let mut response = match state.dispatch(op).await? {
        OperationResponse::Rendered(rendered) => {
            let mut response = Html(rendered.markup).into_response();
            if let Some(revision) = rendered.published_revision {
                response
                    .headers_mut()
                    .insert(PUBLISHED_REVISION_HEADER, HeaderValue::from(revision));
            }
            response
        }
        _ => (StatusCode::NOT_FOUND, Html("<h1>Page not found</h1>")).into_response(),
    };

    let cache_control = format!("public, max-age={}", state.dynamic_max_age_secs);
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    Ok(response)
}
