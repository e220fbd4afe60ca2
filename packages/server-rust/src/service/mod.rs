//! Operation execution framework.
//!
//! 1. **Operations** (`operation`): typed requests with caller context
//! 2. **Middleware** (`middleware`): Tower layers (load shedding, admission,
//!    timeout, metrics)
//! 3. **Page service** (`page_service`): executes operations against the
//!    publish orchestrator and the ownership claim protocol

pub mod middleware;
pub mod operation;
pub mod page_service;

pub use middleware::{build_operation_pipeline, OperationPipeline};
pub use operation::{Operation, OperationContext, OperationError, OperationResponse};
pub use page_service::PageService;
