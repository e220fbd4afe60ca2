//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use pagedrop_core::Clock;

use super::counter::{CounterSnapshot, CounterStore};

/// Entries kept before expired windows are pruned on the next increment.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: i64,
}

/// Counter store for a single instance. Windows expire lazily when touched.
pub struct MemoryCounterStore {
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Number of live counter entries (expired ones included until pruned).
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.windows.clear();
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> anyhow::Result<CounterSnapshot> {
        let now = self.clock.now_millis();
        let window_ms = i64::try_from(window.as_millis())?;

        if self.windows.len() > PRUNE_THRESHOLD {
            self.windows.retain(|_, w| w.expires_at > now);
        }

        let snapshot = {
            let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
                count: 0,
                expires_at: now + window_ms,
            });
            if entry.expires_at <= now {
                *entry = Window {
                    count: 0,
                    expires_at: now + window_ms,
                };
            }
            entry.count += 1;
            *entry
        };

        let remaining_ms = u64::try_from(snapshot.expires_at - now).unwrap_or(0);
        Ok(CounterSnapshot {
            count: snapshot.count,
            ttl_remaining: Duration::from_millis(remaining_ms),
        })
    }
}
