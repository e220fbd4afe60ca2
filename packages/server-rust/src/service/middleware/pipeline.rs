//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pagedrop_core::CallerIdentity;
use tower::{ServiceBuilder, ServiceExt};

use super::admission::{AdmissionLayer, AdmissionService};
use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::admission::AdmissionController;
use crate::config::ServerConfig;
use crate::service::operation::{Operation, OperationContext, OperationError, OperationResponse};
use crate::service::page_service::PageService;

/// Fully layered page service.
pub type PipelineService =
    LoadShedService<AdmissionService<TimeoutService<MetricsService<PageService>>>>;

/// Wrap `service` with the middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `AdmissionLayer` -- rate limit before the operation runs
/// 3. `TimeoutLayer` -- enforce per-operation timeouts
/// 4. `MetricsLayer` -- record timing and outcome (closest to the actual handler)
#[must_use]
pub fn build_operation_pipeline(
    service: PageService,
    load_shed: &LoadShedLayer,
    admission: &AdmissionLayer,
) -> PipelineService {
    ServiceBuilder::new()
        .layer(load_shed.clone())
        .layer(admission.clone())
        .layer(TimeoutLayer)
        .layer(MetricsLayer)
        .service(service)
}

/// Cloneable handle the transport layer dispatches through.
///
/// Holds the layer state that must be shared across requests (the load-shed
/// semaphore, the admission controller) and assembles a fresh stack per call.
#[derive(Clone)]
pub struct OperationPipeline {
    service: PageService,
    load_shed: LoadShedLayer,
    admission: AdmissionLayer,
    next_call_id: Arc<AtomicU64>,
    default_timeout_ms: u64,
}

impl OperationPipeline {
    #[must_use]
    pub fn new(
        service: PageService,
        admission: Arc<AdmissionController>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            service,
            load_shed: LoadShedLayer::new(config.max_concurrent_operations),
            admission: AdmissionLayer::new(admission),
            next_call_id: Arc::new(AtomicU64::new(1)),
            default_timeout_ms: config.default_operation_timeout_ms,
        }
    }

    /// New context for `operation` with a fresh call id and the default timeout.
    #[must_use]
    pub fn context(&self, operation: &'static str, identity: CallerIdentity) -> OperationContext {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        OperationContext::new(call_id, operation, identity, self.default_timeout_ms)
    }

    /// Operations that could start without being shed.
    #[must_use]
    pub fn available_capacity(&self) -> usize {
        self.load_shed.available_permits()
    }

    /// Runs `op` through every layer.
    ///
    /// # Errors
    ///
    /// Whatever the layers or the page service return.
    pub async fn dispatch(&self, op: Operation) -> Result<OperationResponse, OperationError> {
        build_operation_pipeline(self.service.clone(), &self.load_shed, &self.admission)
            .oneshot(op)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;
    use pagedrop_core::ManualClock;

    use super::*;
    use crate::admission::MemoryCounterStore;
    use crate::config::{operation_keys, AdmissionConfig, Quota};
    use crate::service::page_service::tests::{page_service, DOC};

    fn pipeline(publish_limit: u32) -> OperationPipeline {
        let admission = AdmissionController::new(
            Arc::new(MemoryCounterStore::new(Arc::new(ManualClock::new(0)))),
            AdmissionConfig {
                enabled: true,
                quotas: HashMap::from([(
                    operation_keys::PUBLISH.to_string(),
                    Quota::per_minute(publish_limit),
                )]),
                backend_timeout_ms: 100,
            },
        );
        OperationPipeline::new(page_service(), Arc::new(admission), &ServerConfig::default())
    }

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let pipeline = pipeline(10);
        let anon = CallerIdentity::anonymous("1.1.1.1", "anon_abc");

        let ctx = pipeline.context(operation_keys::CREATE_PAGE, anon.clone());
        let OperationResponse::Page(page) = pipeline
            .dispatch(Operation::CreatePage { ctx })
            .await
            .unwrap()
        else {
            panic!("expected page");
        };

        let ctx = pipeline.context(operation_keys::PUBLISH, anon);
        let resp = pipeline
            .dispatch(Operation::Publish {
                ctx,
                page_id: page.id.clone(),
                base_revision: 1,
                document: Bytes::from_static(DOC),
            })
            .await
            .unwrap();
        assert!(matches!(resp, OperationResponse::Published(_)));
    }

    #[tokio::test]
    async fn rate_limited_publish_leaves_page_untouched() {
        let pipeline = pipeline(0);
        let anon = CallerIdentity::anonymous("1.1.1.1", "anon_abc");

        let ctx = pipeline.context(operation_keys::CREATE_PAGE, anon.clone());
        let OperationResponse::Page(page) =
            pipeline.dispatch(Operation::CreatePage { ctx }).await.unwrap()
        else {
            panic!("expected page");
        };

        let ctx = pipeline.context(operation_keys::PUBLISH, anon.clone());
        let err = pipeline
            .dispatch(Operation::Publish {
                ctx,
                page_id: page.id.clone(),
                base_revision: 1,
                document: Bytes::from_static(DOC),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::RateLimited { limit: 0, .. }));

        let ctx = pipeline.context(operation_keys::GET_PAGE, anon);
        let OperationResponse::Page(current) = pipeline
            .dispatch(Operation::GetPage {
                ctx,
                page_id: page.id.clone(),
            })
            .await
            .unwrap()
        else {
            panic!("expected page");
        };
        assert_eq!(current.server_revision, 1);
        assert!(!current.is_published);
    }

    #[test]
    fn call_ids_increase() {
        let pipeline = pipeline(1);
        let a = pipeline.context(operation_keys::GET_PAGE, CallerIdentity::default());
        let b = pipeline.context(operation_keys::GET_PAGE, CallerIdentity::default());
        assert!(b.call_id > a.call_id);
    }
}
