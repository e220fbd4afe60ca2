//! Revision store contract.
//!
//! Defines [`PageStore`], the durability substrate every other component reads
//! and writes through. The only cross-request coordination primitive is
//! [`PageStore::cas_update`]: a conditional write that applies only if the
//! stored `server_revision` still equals the caller's expected value.

use async_trait::async_trait;
use pagedrop_core::{Page, PageDocument, PageId, PageSummary, User};

/// Errors from the revision store itself (not CAS outcomes).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("page not found: {0}")]
    PageNotFound(PageId),
    #[error("page already exists: {0}")]
    PageExists(PageId),
    #[error("store call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// A mutation applied by [`PageStore::cas_update`].
///
/// Every patch advances `server_revision` by exactly one.
#[derive(Debug, Clone)]
pub enum PagePatch {
    /// Replace the working draft. The published snapshot is untouched.
    SaveDraft { document: PageDocument, now: i64 },
    /// Replace the draft and capture it as the published snapshot under `slug`.
    Publish {
        document: PageDocument,
        slug: String,
        now: i64,
    },
}

impl PagePatch {
    /// Slug this patch commits, if any.
    #[must_use]
    pub fn slug(&self) -> Option<&str> {
        match self {
            Self::SaveDraft { .. } => None,
            Self::Publish { slug, .. } => Some(slug),
        }
    }

    /// Applies the patch to an in-memory page whose revision has already been
    /// checked. Shared by engines that hold the whole row in memory.
    pub fn apply_to(self, page: &mut Page) {
        let next_revision = page.server_revision + 1;
        match self {
            Self::SaveDraft { document, now } => {
                page.draft_content = document.blocks;
                page.draft_background = document.background;
                page.updated_at = now;
            }
            Self::Publish {
                document,
                slug,
                now,
            } => {
                page.published_content = Some(document.blocks.clone());
                page.published_background = Some(document.background.clone());
                page.draft_content = document.blocks;
                page.draft_background = document.background;
                page.published_revision = Some(next_revision);
                page.is_published = true;
                page.slug = Some(slug);
                page.published_at = Some(now);
                page.updated_at = now;
            }
        }
        page.server_revision = next_revision;
    }
}

/// Result of a conditional write.
///
/// Mismatches are normal outcomes, not errors.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The write applied; carries the row as stored afterwards.
    Applied(Box<Page>),
    /// The stored revision no longer matched the expected one.
    RevisionMismatch { current_revision: u64 },
    /// The slug in a publish patch is reserved by another page.
    SlugTaken { holder: PageId },
}

/// Durable page storage with optimistic concurrency.
///
/// Implementations: in-memory (tests, single process), redb (single-writer
/// embedded engine), `PostgreSQL` (shared by many instances).
///
/// Slug uniqueness is kept in a reservation index (slug -> page id).
/// [`reserve_slug`](PageStore::reserve_slug) claims an entry ahead of artifact
/// upload; a publish [`cas_update`](PageStore::cas_update) re-checks it and
/// releases every other entry the same page held, in the same atomic write.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Short engine name for logs.
    fn backend_name(&self) -> &'static str;

    /// One-time initialization (create tables, open files).
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Insert a new page. Fails with [`StoreError::PageExists`] on id reuse.
    async fn create_page(&self, page: &Page) -> Result<(), StoreError>;

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>, StoreError>;

    /// Look up the page currently committed under `slug`.
    async fn get_page_by_slug(&self, slug: &str) -> Result<Option<Page>, StoreError>;

    async fn list_pages_for_owner(&self, owner_token: &str)
        -> Result<Vec<PageSummary>, StoreError>;

    /// Apply `patch` only if the stored revision equals `expected_revision`.
    ///
    /// On success the revision advances by one. A missing page is
    /// [`StoreError::PageNotFound`].
    async fn cas_update(
        &self,
        id: &PageId,
        expected_revision: u64,
        patch: PagePatch,
    ) -> Result<CasOutcome, StoreError>;

    /// Page currently holding a reservation for `slug`, if any.
    async fn slug_holder(&self, slug: &str) -> Result<Option<PageId>, StoreError>;

    /// Reserve `slug` for `page`. Returns `true` if the reservation is now
    /// held by `page` (freshly, or because it already was).
    async fn reserve_slug(&self, slug: &str, page: &PageId) -> Result<bool, StoreError>;

    /// Reassign every unpublished, unclaimed page owned by `anonymous_token`
    /// to `user_id`. Returns the ids that changed hands.
    async fn claim_anonymous(
        &self,
        anonymous_token: &str,
        user_id: &str,
        now: i64,
    ) -> Result<Vec<PageId>, StoreError>;

    /// Delete unclaimed, unpublished pages last updated before
    /// `idle_before`, releasing their slug reservations. Returns the count.
    async fn delete_stale_anonymous(&self, idle_before: i64) -> Result<u64, StoreError>;

    /// Insert or replace a user record. Returns `false`, writing nothing, when
    /// another user already holds `user.username`.
    async fn put_user(&self, user: &User) -> Result<bool, StoreError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Release resources and close connections.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Claim eligibility shared by engines that filter rows in memory.
pub(crate) fn is_claimable(page: &Page, anonymous_token: &str) -> bool {
    page.user_id.is_none() && !page.is_published && page.owner_token == anonymous_token
}

/// Sweep eligibility shared by engines that filter rows in memory.
pub(crate) fn is_stale_anonymous(page: &Page, idle_before: i64) -> bool {
    page.user_id.is_none() && !page.is_published && page.updated_at < idle_before
}

#[cfg(test)]
mod tests {
    use pagedrop_core::{Background, PageDocument};

    use super::*;

    fn draft() -> Page {
        Page::new_draft(PageId::new("p1"), "anon_a".to_string(), None, 0)
    }

    #[test]
    fn save_draft_leaves_snapshot_alone() {
        let mut page = draft();
        PagePatch::SaveDraft {
            document: PageDocument::default(),
            now: 5,
        }
        .apply_to(&mut page);
        assert_eq!(page.server_revision, 2);
        assert!(page.published_content.is_none());
        assert_eq!(page.updated_at, 5);
    }

    #[test]
    fn publish_sets_snapshot_and_revision() {
        let mut page = draft();
        page.server_revision = 3;
        let document = PageDocument {
            blocks: Vec::new(),
            background: Background::Solid {
                color: "#000".to_string(),
            },
        };
        PagePatch::Publish {
            document: document.clone(),
            slug: "user-ab12cd34".to_string(),
            now: 9,
        }
        .apply_to(&mut page);

        assert_eq!(page.server_revision, 4);
        assert_eq!(page.published_revision, Some(4));
        assert!(page.is_published);
        assert_eq!(page.slug.as_deref(), Some("user-ab12cd34"));
        assert_eq!(page.published_document(), Some(document));
        assert_eq!(page.published_at, Some(9));
    }

    #[test]
    fn eligibility_helpers() {
        let mut page = draft();
        assert!(is_claimable(&page, "anon_a"));
        assert!(!is_claimable(&page, "anon_b"));
        assert!(is_stale_anonymous(&page, 1));
        page.is_published = true;
        assert!(!is_claimable(&page, "anon_a"));
        assert!(!is_stale_anonymous(&page, 1));
    }
}
