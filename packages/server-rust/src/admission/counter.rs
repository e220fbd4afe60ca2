//! Fixed-window counter backend contract.

use std::time::Duration;

use async_trait::async_trait;

/// Counter state right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Hits in the current window, this one included.
    pub count: u64,
    /// Time until the window resets.
    pub ttl_remaining: Duration,
}

/// Injected counter store. One implementation per deployment shape: an
/// in-process map for a single instance, a shared database table for many.
#[async_trait]
pub trait CounterStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Prepares the backend (creates tables and the like).
    async fn init(&self) -> anyhow::Result<()>;

    /// Drops every counter.
    async fn reset(&self) -> anyhow::Result<()>;

    /// Counts one hit on `key`. A key whose window has elapsed starts a new
    /// window of length `window` at count 1.
    async fn increment(&self, key: &str, window: Duration) -> anyhow::Result<CounterSnapshot>;
}
