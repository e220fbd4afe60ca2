//! Tower middleware layers for the operation pipeline.
//!
//! - [`load_shed`]: Semaphore-based concurrency limiting
//! - [`admission`]: Per-operation rate limiting
//! - [`timeout`]: Per-operation timeout enforcement
//! - [`metrics`]: Operation timing and outcome counters
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod admission;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use admission::AdmissionLayer;
pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_operation_pipeline, OperationPipeline, PipelineService};
pub use timeout::TimeoutLayer;
