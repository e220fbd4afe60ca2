//! Maps pipeline errors onto HTTP status codes and the JSON error contract.
//!
//! Every failure body has `success: false`. Revision conflicts add
//! `conflict: true` and `currentRevision`; everything else carries `error`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pagedrop_core::ValidationError;
use serde_json::json;
use tracing::error;

use crate::service::OperationError;

/// Handler error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Operation(#[from] OperationError),
    /// The request itself could not be decoded.
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("server is shutting down")]
    Draining,
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::Operation(OperationError::Validation(e))
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Draining => StatusCode::SERVICE_UNAVAILABLE,
            Self::Operation(op) => match op {
                OperationError::Validation(ValidationError::TooLarge { .. }) => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                OperationError::Validation(_) => StatusCode::BAD_REQUEST,
                OperationError::Unauthenticated => StatusCode::UNAUTHORIZED,
                OperationError::Forbidden(_) => StatusCode::FORBIDDEN,
                OperationError::NotFound(_) => StatusCode::NOT_FOUND,
                OperationError::Conflict { .. } | OperationError::AlreadyExists(_) => {
                    StatusCode::CONFLICT
                }
                OperationError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                OperationError::StorageUnavailable { .. } | OperationError::Overloaded => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                OperationError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                OperationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Operation(OperationError::Conflict { current_revision }) => (
                status,
                Json(json!({
                    "success": false,
                    "conflict": true,
                    "currentRevision": current_revision,
                })),
            )
                .into_response(),
            Self::Operation(OperationError::RateLimited { limit, retry_after }) => {
                let secs = retry_after.as_secs().max(1);
                let mut response = (
                    status,
                    Json(json!({
                        "success": false,
                        "error": "rate limited",
                        "limit": limit,
                        "retryAfter": secs,
                    })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                response
            }
            Self::Operation(OperationError::Internal(e)) => {
                error!(error = %e, "internal error");
                (
                    status,
                    Json(json!({ "success": false, "error": "internal error" })),
                )
                    .into_response()
            }
            other => (
                status,
                Json(json!({ "success": false, "error": other.to_string() })),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn conflict_carries_current_revision() {
        let response =
            ApiError::from(OperationError::Conflict { current_revision: 7 }).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["conflict"], true);
        assert_eq!(body["currentRevision"], 7);
    }

    #[tokio::test]
    async fn rate_limit_sets_retry_after() {
        let response = ApiError::from(OperationError::RateLimited {
            limit: 10,
            retry_after: Duration::from_secs(42),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[tokio::test]
    async fn storage_unavailable_is_503_with_error() {
        let response = ApiError::from(OperationError::StorageUnavailable {
            reason: "upload timed out".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("upload timed out"));
    }

    #[tokio::test]
    async fn internal_errors_are_not_leaked() {
        let response =
            ApiError::from(OperationError::Internal(anyhow::anyhow!("db password wrong")))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "internal error");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::from(ValidationError::InvalidToken).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(OperationError::Unauthenticated).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(OperationError::Timeout { timeout_ms: 1 }).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(ApiError::Draining.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
