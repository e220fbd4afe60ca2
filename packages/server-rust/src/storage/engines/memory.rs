//! In-memory [`PageStore`] implementation.
//!
//! Keeps pages, the slug reservation index and users behind a single
//! `parking_lot::RwLock` so that a CAS commit and its slug bookkeeping are one
//! atomic step, the same guarantee a single-writer SQL engine gives with a
//! conditional `UPDATE`. Suitable for tests and single-instance development.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use pagedrop_core::{Page, PageId, PageSummary, User};

use crate::storage::page_store::{
    is_claimable, is_stale_anonymous, CasOutcome, PagePatch, PageStore, StoreError,
};

#[derive(Default)]
struct Tables {
    pages: HashMap<PageId, Page>,
    slugs: HashMap<String, PageId>,
    users: HashMap<String, User>,
}

/// In-memory revision store.
#[derive(Default)]
pub struct MemoryPageStore {
    tables: RwLock<Tables>,
}

impl MemoryPageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.tables.read().pages.len()
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_page(&self, page: &Page) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.pages.contains_key(&page.id) {
            return Err(StoreError::PageExists(page.id.clone()));
        }
        tables.pages.insert(page.id.clone(), page.clone());
        Ok(())
    }

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>, StoreError> {
        Ok(self.tables.read().pages.get(id).cloned())
    }

    async fn get_page_by_slug(&self, slug: &str) -> Result<Option<Page>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .slugs
            .get(slug)
            .and_then(|id| tables.pages.get(id))
            .filter(|page| page.slug.as_deref() == Some(slug))
            .cloned())
    }

    async fn list_pages_for_owner(
        &self,
        owner_token: &str,
    ) -> Result<Vec<PageSummary>, StoreError> {
        let tables = self.tables.read();
        let mut pages: Vec<PageSummary> = tables
            .pages
            .values()
            .filter(|page| page.owner_token == owner_token)
            .map(Page::summary)
            .collect();
        pages.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(pages)
    }

    async fn cas_update(
        &self,
        id: &PageId,
        expected_revision: u64,
        patch: PagePatch,
    ) -> Result<CasOutcome, StoreError> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        let current_revision = tables
            .pages
            .get(id)
            .map(|page| page.server_revision)
            .ok_or_else(|| StoreError::PageNotFound(id.clone()))?;
        if current_revision != expected_revision {
            return Ok(CasOutcome::RevisionMismatch { current_revision });
        }

        if let Some(slug) = patch.slug() {
            if let Some(holder) = tables.slugs.get(slug) {
                if holder != id {
                    return Ok(CasOutcome::SlugTaken {
                        holder: holder.clone(),
                    });
                }
            }
            let slug = slug.to_string();
            tables
                .slugs
                .retain(|reserved, holder| holder != id || *reserved == slug);
            tables.slugs.insert(slug, id.clone());
        }

        let page = tables
            .pages
            .get_mut(id)
            .ok_or_else(|| StoreError::PageNotFound(id.clone()))?;
        patch.apply_to(page);
        Ok(CasOutcome::Applied(Box::new(page.clone())))
    }

    async fn slug_holder(&self, slug: &str) -> Result<Option<PageId>, StoreError> {
        Ok(self.tables.read().slugs.get(slug).cloned())
    }

    async fn reserve_slug(&self, slug: &str, page: &PageId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        match tables.slugs.get(slug) {
            Some(holder) => Ok(holder == page),
            None => {
                tables.slugs.insert(slug.to_string(), page.clone());
                Ok(true)
            }
        }
    }

    async fn claim_anonymous(
        &self,
        anonymous_token: &str,
        user_id: &str,
        now: i64,
    ) -> Result<Vec<PageId>, StoreError> {
        let mut tables = self.tables.write();
        let mut claimed = Vec::new();
        for page in tables.pages.values_mut() {
            if is_claimable(page, anonymous_token) {
                page.user_id = Some(user_id.to_string());
                page.owner_token = user_id.to_string();
                page.updated_at = now;
                claimed.push(page.id.clone());
            }
        }
        claimed.sort();
        Ok(claimed)
    }

    async fn delete_stale_anonymous(&self, idle_before: i64) -> Result<u64, StoreError> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        let stale: Vec<PageId> = tables
            .pages
            .values()
            .filter(|page| is_stale_anonymous(page, idle_before))
            .map(|page| page.id.clone())
            .collect();

        for id in &stale {
            tables.pages.remove(id);
        }
        tables.slugs.retain(|_, holder| !stale.contains(holder));

        Ok(stale.len() as u64)
    }

    async fn put_user(&self, user: &User) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        if let Some(username) = user.username.as_deref() {
            let taken = tables
                .users
                .values()
                .any(|other| other.id != user.id && other.username.as_deref() == Some(username));
            if taken {
                return Ok(false);
            }
        }
        tables.users.insert(user.id.clone(), user.clone());
        Ok(true)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().users.get(id).cloned())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pagedrop_core::PageDocument;

    use super::*;

    fn anon_page(id: &str, token: &str, now: i64) -> Page {
        Page::new_draft(PageId::new(id), token.to_string(), None, now)
    }

    fn publish(slug: &str) -> PagePatch {
        PagePatch::Publish {
            document: PageDocument::default(),
            slug: slug.to_string(),
            now: 10,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = MemoryPageStore::new();
        let page = anon_page("p1", "anon_a", 0);
        store.create_page(&page).await.unwrap();
        let err = store.create_page(&page).await.unwrap_err();
        assert!(matches!(err, StoreError::PageExists(_)));
    }

    #[tokio::test]
    async fn cas_applies_once_per_revision() {
        let store = MemoryPageStore::new();
        let id = PageId::new("p1");
        store.create_page(&anon_page("p1", "anon_a", 0)).await.unwrap();

        let draft = PagePatch::SaveDraft {
            document: PageDocument::default(),
            now: 1,
        };
        let first = store.cas_update(&id, 1, draft.clone()).await.unwrap();
        assert!(matches!(first, CasOutcome::Applied(ref p) if p.server_revision == 2));

        let second = store.cas_update(&id, 1, draft).await.unwrap();
        assert!(matches!(
            second,
            CasOutcome::RevisionMismatch { current_revision: 2 }
        ));
    }

    #[tokio::test]
    async fn cas_on_missing_page_is_error() {
        let store = MemoryPageStore::new();
        let err = store
            .cas_update(&PageId::new("nope"), 1, publish("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PageNotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_cas_has_single_winner() {
        let store = Arc::new(MemoryPageStore::new());
        let id = PageId::new("p1");
        store.create_page(&anon_page("p1", "anon_a", 0)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .cas_update(
                        &id,
                        1,
                        PagePatch::SaveDraft {
                            document: PageDocument::default(),
                            now: i,
                        },
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CasOutcome::Applied(_)) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn publish_respects_other_reservations() {
        let store = MemoryPageStore::new();
        store.create_page(&anon_page("p1", "anon_a", 0)).await.unwrap();
        store.create_page(&anon_page("p2", "anon_b", 0)).await.unwrap();

        assert!(store.reserve_slug("taken", &PageId::new("p1")).await.unwrap());
        assert!(!store.reserve_slug("taken", &PageId::new("p2")).await.unwrap());
        // Re-reserving by the same holder is idempotent.
        assert!(store.reserve_slug("taken", &PageId::new("p1")).await.unwrap());

        let outcome = store
            .cas_update(&PageId::new("p2"), 1, publish("taken"))
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::SlugTaken { ref holder } if holder.as_str() == "p1"));
    }

    #[tokio::test]
    async fn publish_releases_stale_reservations_of_same_page() {
        let store = MemoryPageStore::new();
        let id = PageId::new("p1");
        store.create_page(&anon_page("p1", "anon_a", 0)).await.unwrap();
        store.reserve_slug("old-guess", &id).await.unwrap();

        store.cas_update(&id, 1, publish("final")).await.unwrap();

        assert_eq!(store.slug_holder("old-guess").await.unwrap(), None);
        assert_eq!(store.slug_holder("final").await.unwrap(), Some(id.clone()));
        let by_slug = store.get_page_by_slug("final").await.unwrap().unwrap();
        assert_eq!(by_slug.id, id);
    }

    #[tokio::test]
    async fn reservation_alone_does_not_resolve_by_slug() {
        let store = MemoryPageStore::new();
        let id = PageId::new("p1");
        store.create_page(&anon_page("p1", "anon_a", 0)).await.unwrap();
        store.reserve_slug("pending", &id).await.unwrap();
        assert!(store.get_page_by_slug("pending").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_skips_published_and_foreign_pages() {
        let store = MemoryPageStore::new();
        store.create_page(&anon_page("p1", "anon_a", 0)).await.unwrap();
        store.create_page(&anon_page("p2", "anon_a", 0)).await.unwrap();
        store.create_page(&anon_page("p3", "anon_b", 0)).await.unwrap();
        store
            .cas_update(&PageId::new("p2"), 1, publish("public"))
            .await
            .unwrap();

        let claimed = store.claim_anonymous("anon_a", "u1", 50).await.unwrap();
        assert_eq!(claimed, vec![PageId::new("p1")]);

        let p1 = store.get_page(&PageId::new("p1")).await.unwrap().unwrap();
        assert_eq!(p1.user_id.as_deref(), Some("u1"));
        assert_eq!(p1.owner_token, "u1");

        let again = store.claim_anonymous("anon_a", "u1", 60).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn stale_sweep_deletes_only_idle_anonymous_drafts() {
        let store = MemoryPageStore::new();
        store.create_page(&anon_page("old", "anon_a", 0)).await.unwrap();
        store.create_page(&anon_page("fresh", "anon_a", 1_000)).await.unwrap();
        let mut owned = anon_page("owned", "u1", 0);
        owned.user_id = Some("u1".to_string());
        store.create_page(&owned).await.unwrap();
        store.reserve_slug("old-slug", &PageId::new("old")).await.unwrap();

        let deleted = store.delete_stale_anonymous(500).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.page_count(), 2);
        assert_eq!(store.slug_holder("old-slug").await.unwrap(), None);
    }

    #[tokio::test]
    async fn usernames_are_unique_across_users() {
        let store = MemoryPageStore::new();
        let user = |id: &str, username: &str| User {
            id: id.to_string(),
            username: Some(username.to_string()),
            auth_subject: format!("sub|{id}"),
        };

        assert!(store.put_user(&user("u1", "alice")).await.unwrap());
        assert!(!store.put_user(&user("u2", "alice")).await.unwrap());
        assert_eq!(store.get_user("u2").await.unwrap(), None);
        // Re-saving your own username is not a collision.
        assert!(store.put_user(&user("u1", "alice")).await.unwrap());
    }

    #[tokio::test]
    async fn list_pages_by_owner() {
        let store = MemoryPageStore::new();
        store.create_page(&anon_page("p1", "anon_a", 1)).await.unwrap();
        store.create_page(&anon_page("p2", "anon_a", 2)).await.unwrap();
        store.create_page(&anon_page("p3", "anon_b", 3)).await.unwrap();

        let pages = store.list_pages_for_owner("anon_a").await.unwrap();
        let ids: Vec<&str> = pages.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
    }
}
