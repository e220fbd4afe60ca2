//! HTTP handler definitions for the `PageDrop` server.
//!
//! Defines `AppState` (the shared state carried through axum extractors),
//! the error-to-response mapping, and re-exports the handler functions used
//! by the router.

pub mod account;
pub mod error;
pub mod health;
pub mod identity;
pub mod pages;
pub mod public;

pub use account::{get_profile_handler, set_username_handler, start_session_handler};
pub use error::ApiError;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use identity::Caller;
pub use pages::{
    claim_handler, create_page_handler, get_page_handler, list_pages_handler, publish_handler,
    save_draft_handler,
};
pub use public::serve_page_handler;

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::service::{Operation, OperationPipeline, OperationResponse};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references (or cheap clones) so cloning per request is fine.
#[derive(Clone)]
pub struct AppState {
    /// Operation pipeline every page route dispatches through.
    pub pipeline: OperationPipeline,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// `Cache-Control: max-age` for dynamically served pages.
    pub dynamic_max_age_secs: u64,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Dispatches `op` while counting it as in flight.
    ///
    /// # Errors
    ///
    /// [`ApiError::Draining`] once shutdown has begun, otherwise whatever the
    /// pipeline returns.
    pub async fn dispatch(&self, op: Operation) -> Result<OperationResponse, ApiError> {
        let Some(_guard) = self.shutdown.try_begin_request() else {
            return Err(ApiError::Draining);
        };
        Ok(self.pipeline.dispatch(op).await?)
    }
}
