//! Admission control: fixed-window rate limiting per operation and caller.
//!
//! [`AdmissionController::check`] counts one hit against
//! `rl:{operation}:{origin}|{who}` in the injected [`CounterStore`] and
//! compares it with the operation's [`Quota`]. The controller fails open: a
//! counter store that errors or exceeds its time budget lets the request
//! through and logs a warning.

pub mod counter;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use pagedrop_core::CallerIdentity;

pub use counter::{CounterSnapshot, CounterStore};
pub use memory::MemoryCounterStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCounterStore;

use crate::config::{AdmissionConfig, Quota};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Within quota.
    Allowed { limit: u32, remaining: u32 },
    /// Over quota; the operation must not run.
    Rejected { limit: u32, retry_after: Duration },
    /// Not counted: no quota for the operation, admission disabled, or the
    /// counter store was unavailable.
    Unmetered,
}

impl AdmissionDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Applies per-operation quotas to callers.
pub struct AdmissionController {
    store: Arc<dyn CounterStore>,
    config: AdmissionConfig,
}

impl AdmissionController {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, config: AdmissionConfig) -> Self {
        Self { store, config }
    }

    /// Counter key for `operation` and `identity`.
    #[must_use]
    pub fn counter_key(operation: &str, identity: &CallerIdentity) -> String {
        format!("rl:{operation}:{}", identity.admission_key())
    }

    #[must_use]
    pub fn quota(&self, operation: &str) -> Option<Quota> {
        self.config.quotas.get(operation).copied()
    }

    /// Counts one attempt of `operation` by `identity`.
    pub async fn check(&self, operation: &str, identity: &CallerIdentity) -> AdmissionDecision {
        if !self.config.enabled {
            return AdmissionDecision::Unmetered;
        }
        let Some(quota) = self.quota(operation) else {
            return AdmissionDecision::Unmetered;
        };

        let key = Self::counter_key(operation, identity);
        let budget = Duration::from_millis(self.config.backend_timeout_ms);
        let snapshot =
            match tokio::time::timeout(budget, self.store.increment(&key, quota.window)).await {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(e)) => {
                    tracing::warn!(
                        backend = self.store.backend_name(),
                        operation,
                        error = %e,
                        "admission counter failed, allowing request"
                    );
                    metrics::counter!("pagedrop_admission_fail_open_total").increment(1);
                    return AdmissionDecision::Unmetered;
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        backend = self.store.backend_name(),
                        operation,
                        timeout_ms = self.config.backend_timeout_ms,
                        "admission counter timed out, allowing request"
                    );
                    metrics::counter!("pagedrop_admission_fail_open_total").increment(1);
                    return AdmissionDecision::Unmetered;
                }
            };

        let limit = u64::from(quota.limit);
        if snapshot.count > limit {
            metrics::counter!("pagedrop_admission_rejected_total", "operation" => operation.to_string())
                .increment(1);
            tracing::debug!(operation, key = %key, count = snapshot.count, "admission rejected");
            AdmissionDecision::Rejected {
                limit: quota.limit,
                retry_after: snapshot.ttl_remaining.max(Duration::from_secs(1)),
            }
        } else {
            AdmissionDecision::Allowed {
                limit: quota.limit,
                remaining: u32::try_from(limit - snapshot.count).unwrap_or(0),
            }
        }
    }
}
