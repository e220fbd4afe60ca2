//! Session and profile handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use pagedrop_core::{User, ValidationError};
use serde::Deserialize;
use serde_json::json;

use super::pages::unexpected;
use super::{ApiError, AppState, Caller};
use crate::config::operation_keys;
use crate::service::{Operation, OperationResponse};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UsernameRequest {
    username: String,
}

fn profile_body(user: Option<&User>) -> serde_json::Value {
    json!({
        "success": true,
        "user": user.map(|u| json!({ "id": u.id, "username": u.username })),
    })
}

/// `POST /api/session`: mints an anonymous token.
///
/// The client sends the token back in `x-anonymous-token` and the issue time
/// in `x-anonymous-issued-at`, the latter only when claiming.
pub async fn start_session_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.pipeline.context(operation_keys::START_SESSION, identity);
    match state.dispatch(Operation::StartSession { ctx }).await? {
        OperationResponse::Session(claim) => Ok((
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "token": claim.token,
                "issuedAt": claim.issued_at,
            })),
        )),
        other => Err(unexpected(&other)),
    }
}

/// `GET /api/me`
pub async fn get_profile_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.pipeline.context(operation_keys::GET_PAGE, identity);
    match state.dispatch(Operation::GetProfile { ctx }).await? {
        OperationResponse::Profile(user) => Ok(Json(profile_body(user.as_ref()))),
        other => Err(unexpected(&other)),
    }
}

/// `PUT /api/me`: sets the username that seeds the caller's page slugs.
pub async fn set_username_handler(
    State(state): State<AppState>,
    Caller(identity): Caller,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: UsernameRequest =
        serde_json::from_slice(&body).map_err(|e| ValidationError::Malformed {
            reason: e.to_string(),
        })?;
    let ctx = state.pipeline.context(operation_keys::UPDATE_PROFILE, identity);
    let op = Operation::SetUsername {
        ctx,
        username: req.username,
    };
    match state.dispatch(op).await? {
        OperationResponse::Profile(user) => Ok(Json(profile_body(user.as_ref()))),
        other => Err(unexpected(&other)),
    }
}
