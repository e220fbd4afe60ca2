//! Admission middleware: runs the rate-limit check before the operation and
//! short-circuits with `OperationError::RateLimited` on rejection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::admission::{AdmissionController, AdmissionDecision};
use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// AdmissionLayer
// ---------------------------------------------------------------------------

/// Tower layer gating operations through an [`AdmissionController`].
#[derive(Clone)]
pub struct AdmissionLayer {
    controller: Arc<AdmissionController>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        Self { controller }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            controller: Arc::clone(&self.controller),
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    controller: Arc<AdmissionController>,
}

impl<S> Service<Operation> for AdmissionService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        // The check is async, so the readied inner service is taken and a
        // fresh clone left in its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let controller = Arc::clone(&self.controller);

        Box::pin(async move {
            let decision = {
                let ctx = op.ctx();
                controller.check(ctx.operation, &ctx.identity).await
            };
            match decision {
                AdmissionDecision::Rejected { limit, retry_after } => {
                    Err(OperationError::RateLimited { limit, retry_after })
                }
                AdmissionDecision::Allowed { .. } | AdmissionDecision::Unmetered => {
                    inner.call(op).await
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use pagedrop_core::{CallerIdentity, ManualClock};
    use tower::ServiceExt;

    use super::*;
    use crate::admission::MemoryCounterStore;
    use crate::config::{operation_keys, AdmissionConfig, Quota};
    use crate::service::operation::OperationContext;

    /// Counts how many operations reached it.
    #[derive(Clone, Default)]
    struct CountingService {
        hits: Arc<AtomicU32>,
    }

    impl Service<Operation> for CountingService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _op: Operation) -> Self::Future {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(OperationResponse::NotPublished) })
        }
    }

    fn layer(limit: u32) -> AdmissionLayer {
        let config = AdmissionConfig {
            enabled: true,
            quotas: HashMap::from([(operation_keys::PUBLISH.to_string(), Quota::per_minute(limit))]),
            backend_timeout_ms: 100,
        };
        let store = Arc::new(MemoryCounterStore::new(Arc::new(ManualClock::new(0))));
        AdmissionLayer::new(Arc::new(AdmissionController::new(store, config)))
    }

    fn publish_op() -> Operation {
        Operation::Publish {
            ctx: OperationContext::new(
                1,
                operation_keys::PUBLISH,
                CallerIdentity::anonymous("10.0.0.1", "anon_abc"),
                1_000,
            ),
            page_id: pagedrop_core::PageId::new("p"),
            base_revision: 1,
            document: bytes::Bytes::new(),
        }
    }

    #[tokio::test]
    async fn rejected_operations_never_reach_inner_service() {
        let inner = CountingService::default();
        let layer = layer(1);

        layer.layer(inner.clone()).oneshot(publish_op()).await.unwrap();
        let err = layer
            .layer(inner.clone())
            .oneshot(publish_op())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OperationError::RateLimited { limit: 1, retry_after } if retry_after == Duration::from_secs(60)
        ));
        assert_eq!(inner.hits.load(Ordering::SeqCst), 1);
    }
}
