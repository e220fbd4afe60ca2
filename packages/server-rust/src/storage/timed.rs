//! Timeout decorator for any [`PageStore`].
//!
//! Every call is bounded by `tokio::time::timeout`; an elapsed deadline
//! surfaces as [`StoreError::Timeout`]. A timed-out CAS is reported to the
//! caller as a failure even though the engine may still apply it, so callers
//! treat it like any other store error and never assume the write was lost.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pagedrop_core::{Page, PageId, PageSummary, User};

use super::page_store::{CasOutcome, PagePatch, PageStore, StoreError};

/// Wraps a store so each call carries a bounded timeout.
#[derive(Clone)]
pub struct TimedStore {
    inner: Arc<dyn PageStore>,
    timeout: Duration,
}

impl TimedStore {
    #[must_use]
    pub fn new(inner: Arc<dyn PageStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        if let Ok(result) = tokio::time::timeout(self.timeout, fut).await {
            result
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let timeout_ms = self.timeout.as_millis() as u64;
            tracing::warn!(
                backend = self.inner.backend_name(),
                timeout_ms,
                "revision store call timed out"
            );
            Err(StoreError::Timeout { timeout_ms })
        }
    }
}

#[async_trait]
impl PageStore for TimedStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        self.inner.initialize().await
    }

    async fn create_page(&self, page: &Page) -> Result<(), StoreError> {
        self.bounded(self.inner.create_page(page)).await
    }

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>, StoreError> {
        self.bounded(self.inner.get_page(id)).await
    }

    async fn get_page_by_slug(&self, slug: &str) -> Result<Option<Page>, StoreError> {
        self.bounded(self.inner.get_page_by_slug(slug)).await
    }

    async fn list_pages_for_owner(
        &self,
        owner_token: &str,
    ) -> Result<Vec<PageSummary>, StoreError> {
        self.bounded(self.inner.list_pages_for_owner(owner_token))
            .await
    }

    async fn cas_update(
        &self,
        id: &PageId,
        expected_revision: u64,
        patch: PagePatch,
    ) -> Result<CasOutcome, StoreError> {
        self.bounded(self.inner.cas_update(id, expected_revision, patch))
            .await
    }

    async fn slug_holder(&self, slug: &str) -> Result<Option<PageId>, StoreError> {
        self.bounded(self.inner.slug_holder(slug)).await
    }

    async fn reserve_slug(&self, slug: &str, page: &PageId) -> Result<bool, StoreError> {
        self.bounded(self.inner.reserve_slug(slug, page)).await
    }

    async fn claim_anonymous(
        &self,
        anonymous_token: &str,
        user_id: &str,
        now: i64,
    ) -> Result<Vec<PageId>, StoreError> {
        self.bounded(self.inner.claim_anonymous(anonymous_token, user_id, now))
            .await
    }

    async fn delete_stale_anonymous(&self, idle_before: i64) -> Result<u64, StoreError> {
        self.bounded(self.inner.delete_stale_anonymous(idle_before))
            .await
    }

    async fn put_user(&self, user: &User) -> Result<bool, StoreError> {
        self.bounded(self.inner.put_user(user)).await
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.bounded(self.inner.get_user(id)).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPageStore;

    /// Store whose `get_page` never completes.
    struct StuckStore;

    #[async_trait]
    impl PageStore for StuckStore {
        fn backend_name(&self) -> &'static str {
            "stuck"
        }
        async fn initialize(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn create_page(&self, _page: &Page) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_page(&self, _id: &PageId) -> Result<Option<Page>, StoreError> {
            std::future::pending().await
        }
        async fn get_page_by_slug(&self, _slug: &str) -> Result<Option<Page>, StoreError> {
            Ok(None)
        }
        async fn list_pages_for_owner(&self, _o: &str) -> Result<Vec<PageSummary>, StoreError> {
            Ok(Vec::new())
        }
        async fn cas_update(
            &self,
            id: &PageId,
            _expected: u64,
            _patch: PagePatch,
        ) -> Result<CasOutcome, StoreError> {
            Err(StoreError::PageNotFound(id.clone()))
        }
        async fn slug_holder(&self, _slug: &str) -> Result<Option<PageId>, StoreError> {
            Ok(None)
        }
        async fn reserve_slug(&self, _slug: &str, _page: &PageId) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn claim_anonymous(
            &self,
            _t: &str,
            _u: &str,
            _now: i64,
        ) -> Result<Vec<PageId>, StoreError> {
            Ok(Vec::new())
        }
        async fn delete_stale_anonymous(&self, _idle_before: i64) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn put_user(&self, _user: &User) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn get_user(&self, _id: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_call_times_out() {
        let store = TimedStore::new(Arc::new(StuckStore), Duration::from_millis(50));
        let err = store.get_page(&PageId::new("p")).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn passes_results_through() {
        let inner = Arc::new(MemoryPageStore::new());
        let store = TimedStore::new(inner, Duration::from_secs(1));
        let page = Page::new_draft(PageId::new("p"), "anon_x".to_string(), None, 0);
        store.create_page(&page).await.unwrap();
        assert_eq!(store.get_page(&page.id).await.unwrap(), Some(page));
        assert_eq!(store.backend_name(), "memory");
    }
}
