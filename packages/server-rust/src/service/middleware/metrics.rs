//! Operation metrics: a `tracing` span per call plus `metrics` counters and
//! a latency histogram labelled by operation key and outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments operations with timing and outcome.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label of a finished operation.
fn outcome_label(result: &Result<OperationResponse, OperationError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(OperationError::Validation(_)) => "invalid",
        Err(OperationError::Conflict { .. } | OperationError::AlreadyExists(_)) => "conflict",
        Err(OperationError::NotFound(_)) => "not_found",
        Err(OperationError::Forbidden(_) | OperationError::Unauthenticated) => "denied",
        Err(OperationError::StorageUnavailable { .. }) => "storage_unavailable",
        Err(OperationError::RateLimited { .. }) => "rate_limited",
        Err(OperationError::Timeout { .. }) => "timeout",
        Err(OperationError::Overloaded) => "overloaded",
        Err(OperationError::Internal(_)) => "error",
    }
}

impl<S> Service<Operation> for MetricsService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let operation = op.ctx().operation;
        let call_id = op.ctx().call_id;

        let span = info_span!(
            "operation",
            operation,
            call_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(op);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome_label(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "pagedrop_operations_total",
                    "operation" => operation,
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("pagedrop_operation_duration_seconds", "operation" => operation)
                    .record(elapsed.as_secs_f64());

                match &result {
                    Err(OperationError::Internal(e)) => {
                        tracing::error!(operation, call_id, duration_ms, error = %e, "operation failed");
                    }
                    _ => tracing::info!(operation, call_id, duration_ms, outcome, "operation complete"),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use pagedrop_core::CallerIdentity;
    use tower::ServiceExt;

    use super::*;
    use crate::config::operation_keys;
    use crate::service::operation::OperationContext;

    /// Service answering every call with a fixed conflict.
    struct ConflictService;

    impl Service<Operation> for ConflictService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _op: Operation) -> Self::Future {
            Box::pin(async { Err(OperationError::Conflict { current_revision: 4 }) })
        }
    }

    #[tokio::test]
    async fn passes_errors_through_unchanged() {
        let svc = MetricsLayer.layer(ConflictService);
        let ctx = OperationContext::new(
            42,
            operation_keys::CREATE_PAGE,
            CallerIdentity::anonymous("127.0.0.1", "anon_test"),
            5000,
        );
        let err = svc.oneshot(Operation::CreatePage { ctx }).await.unwrap_err();
        assert!(matches!(err, OperationError::Conflict { current_revision: 4 }));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&Ok(OperationResponse::NotPublished)), "ok");
        assert_eq!(outcome_label(&Err(OperationError::Overloaded)), "overloaded");
        assert_eq!(
            outcome_label(&Err(OperationError::Unauthenticated)),
            "denied"
        );
    }
}
