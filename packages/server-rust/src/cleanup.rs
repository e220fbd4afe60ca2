//! Lazy, probabilistic cleanup of abandoned anonymous drafts.
//!
//! There is no scheduled worker. Each handled request calls
//! [`AnonymousSweeper::maybe_sweep`], which with a small configured
//! probability spawns one sweep deleting anonymous, unclaimed, unpublished
//! pages idle past the staleness threshold. At most one sweep runs at a time
//! per process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pagedrop_core::Clock;
use rand::Rng;
use tokio::task::JoinHandle;

use crate::config::CleanupConfig;
use crate::storage::{PageStore, StoreError};

/// Clears the in-progress flag when the sweep task ends, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Probabilistic sweeper for stale anonymous drafts.
#[derive(Clone)]
pub struct AnonymousSweeper {
    store: Arc<dyn PageStore>,
    clock: Arc<dyn Clock>,
    config: CleanupConfig,
    running: Arc<AtomicBool>,
}

impl AnonymousSweeper {
    #[must_use]
    pub fn new(store: Arc<dyn PageStore>, clock: Arc<dyn Clock>, config: CleanupConfig) -> Self {
        Self {
            store,
            clock,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Rolls the dice and, on a hit, spawns a sweep in the background.
    ///
    /// Returns the sweep's handle when one was started.
    pub fn maybe_sweep(&self) -> Option<JoinHandle<()>> {
        let probability = self.config.probability;
        if probability.is_nan() || !rand::rng().random_bool(probability.clamp(0.0, 1.0)) {
            return None;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return None;
        }

        let guard = RunningGuard(Arc::clone(&self.running));
        let sweeper = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = sweeper.sweep().await {
                tracing::warn!(error = %e, "anonymous draft sweep failed");
            }
        }))
    }

    /// Deletes stale anonymous drafts now. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn sweep(&self) -> Result<u64, StoreError> {
        let idle_before = self
            .clock
            .now_millis()
            .saturating_sub(self.config.stale_after_ms);
        let deleted = self.store.delete_stale_anonymous(idle_before).await?;
        metrics::counter!("pagedrop_stale_drafts_deleted_total").increment(deleted);
        if deleted > 0 {
            tracing::info!(deleted, idle_before, "stale anonymous drafts deleted");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pagedrop_core::{ManualClock, Page, PageId, PageSummary, User};

    use super::*;
    use crate::storage::{CasOutcome, MemoryPageStore, PagePatch};

    const DAY: i64 = 24 * 60 * 60 * 1000;

    async fn seeded() -> (Arc<MemoryPageStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryPageStore::new());
        store
            .create_page(&Page::new_draft(PageId::new("old"), "anon_a".to_string(), None, 0))
            .await
            .unwrap();
        store
            .create_page(&Page::new_draft(
                PageId::new("fresh"),
                "anon_b".to_string(),
                None,
                9 * DAY,
            ))
            .await
            .unwrap();
        store
            .create_page(&Page::new_draft(
                PageId::new("owned"),
                "u1".to_string(),
                Some("u1".to_string()),
                0,
            ))
            .await
            .unwrap();
        (store, Arc::new(ManualClock::new(10 * DAY)))
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_anonymous_drafts() {
        let (store, clock) = seeded().await;
        let sweeper = AnonymousSweeper::new(store.clone(), clock, CleanupConfig::default());

        assert_eq!(sweeper.sweep().await.unwrap(), 1);
        assert!(store.get_page(&PageId::new("old")).await.unwrap().is_none());
        assert!(store.get_page(&PageId::new("fresh")).await.unwrap().is_some());
        assert!(store.get_page(&PageId::new("owned")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_probability_never_sweeps() {
        let (store, clock) = seeded().await;
        let sweeper = AnonymousSweeper::new(
            store.clone(),
            clock,
            CleanupConfig {
                probability: 0.0,
                ..CleanupConfig::default()
            },
        );
        for _ in 0..100 {
            assert!(sweeper.maybe_sweep().is_none());
        }
        assert_eq!(store.page_count(), 3);
    }

    #[tokio::test]
    async fn certain_probability_spawns_sweep() {
        let (store, clock) = seeded().await;
        let sweeper = AnonymousSweeper::new(
            store.clone(),
            clock,
            CleanupConfig {
                probability: 1.0,
                ..CleanupConfig::default()
            },
        );
        sweeper.maybe_sweep().unwrap().await.unwrap();
        assert_eq!(store.page_count(), 2);
    }

    /// Panics inside the first sweep only.
    #[derive(Default)]
    struct PanicOnceStore {
        panicked: AtomicBool,
    }

    #[async_trait]
    impl PageStore for PanicOnceStore {
        fn backend_name(&self) -> &'static str {
            "panic-once"
        }
        async fn initialize(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn create_page(&self, _page: &Page) -> Result<(), StoreError> {
            unreachable!()
        }
        async fn get_page(&self, _id: &PageId) -> Result<Option<Page>, StoreError> {
            unreachable!()
        }
        async fn get_page_by_slug(&self, _slug: &str) -> Result<Option<Page>, StoreError> {
            unreachable!()
        }
        async fn list_pages_for_owner(&self, _o: &str) -> Result<Vec<PageSummary>, StoreError> {
            unreachable!()
        }
        async fn cas_update(
            &self,
            _id: &PageId,
            _expected: u64,
            _patch: PagePatch,
        ) -> Result<CasOutcome, StoreError> {
            unreachable!()
        }
        async fn slug_holder(&self, _slug: &str) -> Result<Option<PageId>, StoreError> {
            unreachable!()
        }
        async fn reserve_slug(&self, _slug: &str, _page: &PageId) -> Result<bool, StoreError> {
            unreachable!()
        }
        async fn claim_anonymous(
            &self,
            _token: &str,
            _user_id: &str,
            _now: i64,
        ) -> Result<Vec<PageId>, StoreError> {
            unreachable!()
        }
        async fn delete_stale_anonymous(&self, _idle_before: i64) -> Result<u64, StoreError> {
            assert!(
                self.panicked.swap(true, Ordering::SeqCst),
                "sweep blew up"
            );
            Ok(0)
        }
        async fn put_user(&self, _user: &User) -> Result<bool, StoreError> {
            unreachable!()
        }
        async fn get_user(&self, _id: &str) -> Result<Option<User>, StoreError> {
            unreachable!()
        }
        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicked_sweep_does_not_block_later_sweeps() {
        let sweeper = AnonymousSweeper::new(
            Arc::new(PanicOnceStore::default()),
            Arc::new(ManualClock::new(10 * DAY)),
            CleanupConfig {
                probability: 1.0,
                ..CleanupConfig::default()
            },
        );

        let first = sweeper.maybe_sweep().unwrap().await;
        assert!(first.unwrap_err().is_panic());

        let second = sweeper.maybe_sweep().expect("a new sweep can start");
        second.await.unwrap();
    }
}
