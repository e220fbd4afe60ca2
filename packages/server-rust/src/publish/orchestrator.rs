//! Publish transaction orchestrator.
//!
//! Sequences a publish as: validate, check ownership, resolve and reserve the
//! slug, render, upload the artifact, CAS-commit, invalidate caches. The
//! orchestrator holds no shared mutable state; all coordination between
//! concurrent requests (and instances) goes through the revision store's
//! compare-and-set on `server_revision`.

use std::sync::Arc;

use pagedrop_core::context::is_well_formed_token;
use pagedrop_core::{
    CallerIdentity, Clock, Page, PageDocument, PageId, PageSummary, ValidationError,
};

use super::artifact::{ArtifactError, ArtifactPublisher};
use super::invalidate::CacheInvalidator;
use super::render::Renderer;
use super::slug::{reusable_slug, slug_seed, SlugAllocator};
use super::types::{DraftOutcome, PublishError, PublishOutcome, PublishWarning};
use crate::config::{PublishConfig, StorageMode};
use crate::storage::{CasOutcome, PagePatch, PageStore};

/// Attempts at reserving a freshly allocated slug before giving up. A lost
/// reservation race triggers one re-allocation.
const SLUG_RESERVATION_ATTEMPTS: usize = 2;

/// Drives page creation, draft saves and publishes against a revision store.
pub struct PublishOrchestrator {
    store: Arc<dyn PageStore>,
    renderer: Arc<dyn Renderer>,
    artifacts: ArtifactPublisher,
    invalidator: CacheInvalidator,
    allocator: SlugAllocator,
    clock: Arc<dyn Clock>,
    config: PublishConfig,
}

/// A published page rendered on demand, for serving without an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub slug: String,
    pub markup: String,
    pub published_revision: Option<u64>,
}

impl PublishOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn PageStore>,
        renderer: Arc<dyn Renderer>,
        artifacts: ArtifactPublisher,
        invalidator: CacheInvalidator,
        clock: Arc<dyn Clock>,
        config: PublishConfig,
    ) -> Self {
        Self {
            store,
            renderer,
            artifacts,
            invalidator,
            allocator: SlugAllocator::new(config.max_suffix_attempts),
            clock,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Creates an empty draft owned by the caller.
    ///
    /// # Errors
    ///
    /// [`PublishError::MissingIdentity`] when the caller has neither a user id
    /// nor an anonymous token, a validation error for a malformed anonymous
    /// token, or a store failure.
    pub async fn create_page(&self, identity: &CallerIdentity) -> Result<Page, PublishError> {
        let owner = identity
            .owner_token()
            .ok_or(PublishError::MissingIdentity)?;
        if !identity.is_authenticated() && !is_well_formed_token(owner) {
            return Err(ValidationError::InvalidToken.into());
        }

        let page = Page::new_draft(
            PageId::new(uuid::Uuid::new_v4().to_string()),
            owner.to_string(),
            identity.user_id.clone(),
            self.clock.now_millis(),
        );
        self.store.create_page(&page).await?;
        tracing::info!(page_id = %page.id, anonymous = page.is_anonymous(), "page created");
        Ok(page)
    }

    /// Loads a page the caller owns.
    ///
    /// # Errors
    ///
    /// [`PublishError::NotFound`] or [`PublishError::Forbidden`].
    pub async fn get_page(
        &self,
        identity: &CallerIdentity,
        page_id: &PageId,
    ) -> Result<Page, PublishError> {
        let page = self
            .store
            .get_page(page_id)
            .await?
            .ok_or_else(|| PublishError::NotFound(page_id.clone()))?;
        if !page.is_owned_by(identity) {
            return Err(PublishError::Forbidden(page_id.clone()));
        }
        Ok(page)
    }

    /// Summaries of every page the caller owns, most recently updated first.
    ///
    /// # Errors
    ///
    /// [`PublishError::MissingIdentity`] or a store failure.
    pub async fn list_pages(
        &self,
        identity: &CallerIdentity,
    ) -> Result<Vec<PageSummary>, PublishError> {
        let owner = identity
            .owner_token()
            .ok_or(PublishError::MissingIdentity)?;
        Ok(self.store.list_pages_for_owner(owner).await?)
    }

    /// Replaces the draft with `raw_document` if the stored revision is still
    /// `base_revision`. Never retried.
    ///
    /// # Errors
    ///
    /// Validation, ownership and store errors, or
    /// [`PublishError::Conflict`] on a revision mismatch.
    pub async fn save_draft(
        &self,
        identity: &CallerIdentity,
        page_id: &PageId,
        base_revision: u64,
        raw_document: &[u8],
    ) -> Result<DraftOutcome, PublishError> {
        let document = self.config.limits.parse(raw_document)?;
        self.get_page(identity, page_id).await?;

        let patch = PagePatch::SaveDraft {
            document,
            now: self.clock.now_millis(),
        };
        match self.store.cas_update(page_id, base_revision, patch).await? {
            CasOutcome::Applied(page) => Ok(DraftOutcome {
                page_id: page.id,
                server_revision: page.server_revision,
            }),
            CasOutcome::RevisionMismatch { current_revision } => {
                Err(PublishError::Conflict { current_revision })
            }
            CasOutcome::SlugTaken { .. } => Err(PublishError::SlugUnavailable(page_id.clone())),
        }
    }

    /// Publishes `raw_document` as the page's public snapshot.
    ///
    /// Nothing is written to the revision store unless the artifact upload
    /// succeeded (or storage is optional). A revision mismatch at commit time
    /// is retried exactly once against the freshly read revision, reusing the
    /// artifact already uploaded.
    ///
    /// # Errors
    ///
    /// See [`PublishError`]. Cache invalidation never produces an error.
    pub async fn publish(
        &self,
        identity: &CallerIdentity,
        page_id: &PageId,
        base_revision: u64,
        raw_document: &[u8],
    ) -> Result<PublishOutcome, PublishError> {
        let result = self
            .publish_inner(identity, page_id, base_revision, raw_document)
            .await;
        let outcome = match &result {
            Ok(_) => "published",
            Err(e) => e.kind(),
        };
        metrics::counter!("pagedrop_publish_total", "outcome" => outcome).increment(1);
        result
    }

    async fn publish_inner(
        &self,
        identity: &CallerIdentity,
        page_id: &PageId,
        base_revision: u64,
        raw_document: &[u8],
    ) -> Result<PublishOutcome, PublishError> {
        let document = self.config.limits.parse(raw_document)?;
        let page = self.get_page(identity, page_id).await?;
        let slug = self.resolve_slug(identity, &page).await?;

        let markup = self.renderer.render(&slug, &document);
        let mut warnings = Vec::new();
        let artifact_key = match self.artifacts.publish(&slug, markup).await {
            Ok(receipt) => Some(receipt.key),
            Err(ArtifactError::TooLarge { actual, limit }) => {
                return Err(ValidationError::TooLarge { actual, limit }.into());
            }
            Err(e) if self.config.storage_mode == StorageMode::Optional => {
                tracing::warn!(page_id = %page_id, slug = %slug, error = %e, "publishing without artifact");
                warnings.push(PublishWarning::DegradedArtifact {
                    reason: e.to_string(),
                });
                None
            }
            Err(e) => {
                tracing::warn!(page_id = %page_id, slug = %slug, error = %e, "artifact upload failed, publish aborted");
                return Err(PublishError::StorageUnavailable {
                    reason: e.to_string(),
                });
            }
        };

        let committed = self
            .commit(identity, page_id, base_revision, document, &slug)
            .await?;
        let published_revision = committed
            .published_revision
            .unwrap_or(committed.server_revision);
        tracing::info!(
            page_id = %page_id,
            slug = %slug,
            server_revision = committed.server_revision,
            degraded = artifact_key.is_none(),
            "page published"
        );

        warnings.extend(self.invalidator.invalidate(&slug).await);

        Ok(PublishOutcome {
            page_id: page_id.clone(),
            public_url: self.config.public_url(&slug),
            slug,
            artifact_key,
            server_revision: committed.server_revision,
            published_revision,
            warnings,
        })
    }

    /// CAS-commits the publish, retrying once on a revision mismatch.
    async fn commit(
        &self,
        identity: &CallerIdentity,
        page_id: &PageId,
        base_revision: u64,
        document: PageDocument,
        slug: &str,
    ) -> Result<Page, PublishError> {
        let mut expected = base_revision;
        for attempt in 0..2 {
            let patch = PagePatch::Publish {
                document: document.clone(),
                slug: slug.to_string(),
                now: self.clock.now_millis(),
            };
            match self.store.cas_update(page_id, expected, patch).await? {
                CasOutcome::Applied(page) => return Ok(*page),
                CasOutcome::SlugTaken { holder } => {
                    tracing::warn!(page_id = %page_id, slug, holder = %holder, "slug reservation lost before commit");
                    return Err(PublishError::SlugUnavailable(page_id.clone()));
                }
                CasOutcome::RevisionMismatch { current_revision } if attempt == 0 => {
                    // Re-read rather than trust the mismatch payload so that
                    // ownership is checked against the current row too.
                    let fresh = self.get_page(identity, page_id).await?;
                    if let Some(committed) = fresh.slug.as_deref().filter(|s| *s != slug) {
                        // A concurrent publish already fixed the page's slug;
                        // committing ours would move the live URL.
                        tracing::info!(
                            page_id = %page_id,
                            slug,
                            committed,
                            "slug committed concurrently, not retrying"
                        );
                        return Err(PublishError::Conflict {
                            current_revision: fresh.server_revision,
                        });
                    }
                    tracing::debug!(
                        page_id = %page_id,
                        expected,
                        current_revision,
                        "revision moved during publish, retrying once"
                    );
                    expected = fresh.server_revision;
                }
                CasOutcome::RevisionMismatch { current_revision } => {
                    return Err(PublishError::Conflict { current_revision });
                }
            }
        }
        Err(PublishError::Conflict {
            current_revision: expected,
        })
    }

    /// Reuses the page's slug or allocates and reserves a new one.
    async fn resolve_slug(
        &self,
        identity: &CallerIdentity,
        page: &Page,
    ) -> Result<String, PublishError> {
        if let Some(existing) = reusable_slug(page.slug.as_deref()) {
            if self.store.reserve_slug(existing, &page.id).await? {
                return Ok(existing.to_string());
            }
            tracing::warn!(page_id = %page.id, slug = existing, "existing slug held elsewhere, reallocating");
        }

        let user = match &identity.user_id {
            Some(user_id) => self.store.get_user(user_id).await?,
            None => None,
        };
        let seed = slug_seed(user.as_ref(), &page.owner_token);

        for _ in 0..SLUG_RESERVATION_ATTEMPTS {
            let store = Arc::clone(&self.store);
            let candidate = self
                .allocator
                .allocate(&seed, |candidate| {
                    let store = Arc::clone(&store);
                    let page_id = page.id.clone();
                    async move {
                        let holder = store.slug_holder(&candidate).await?;
                        Ok::<_, PublishError>(holder.is_some_and(|h| h != page_id))
                    }
                })
                .await?;

            if self.store.reserve_slug(&candidate, &page.id).await? {
                return Ok(candidate);
            }
            tracing::debug!(page_id = %page.id, slug = %candidate, "slug reservation race lost");
        }
        Err(PublishError::SlugUnavailable(page.id.clone()))
    }

    /// Renders the published snapshot at `slug`, if any, for dynamic serving.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn render_published(&self, slug: &str) -> Result<Option<RenderedPage>, PublishError> {
        let Some(page) = self.store.get_page_by_slug(slug).await? else {
            return Ok(None);
        };
        let Some(document) = page.published_document() else {
            return Ok(None);
        };
        Ok(Some(RenderedPage {
            slug: slug.to_string(),
            markup: self.renderer.render(slug, &document),
            published_revision: page.published_revision,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use pagedrop_core::{ManualClock, User};

    use super::*;
    use crate::config::Environment;
    use crate::publish::artifact::{MemoryObjectStore, ObjectStore};
    use crate::publish::render::StaticHtmlRenderer;
    use crate::storage::MemoryPageStore;

    const DOC: &[u8] = br##"{"blocks":[{"id":"b1","x":0,"y":0,"w":100,"h":40,"content":{"type":"text","text":"hi"}}],"background":{"type":"solid","color":"#ffffff"}}"##;

    struct FailingObjectStore;

    #[async_trait::async_trait]
    impl ObjectStore for FailingObjectStore {
        fn backend_name(&self) -> &'static str {
            "failing"
        }

        async fn put(&self, _k: &str, _b: Bytes, _c: &str) -> anyhow::Result<()> {
            anyhow::bail!("bucket unreachable")
        }
    }

    struct Harness {
        store: Arc<MemoryPageStore>,
        objects: Arc<MemoryObjectStore>,
        orchestrator: PublishOrchestrator,
    }

    fn harness_with(objects: Option<Arc<dyn ObjectStore>>, config: PublishConfig) -> PublishOrchestrator {
        let store = Arc::new(MemoryPageStore::new());
        build(store, objects, config)
    }

    fn build(
        store: Arc<MemoryPageStore>,
        objects: Option<Arc<dyn ObjectStore>>,
        config: PublishConfig,
    ) -> PublishOrchestrator {
        PublishOrchestrator::new(
            store,
            Arc::new(StaticHtmlRenderer),
            ArtifactPublisher::new(objects, config.max_artifact_bytes, Duration::from_secs(1)),
            CacheInvalidator::new(None, &config),
            Arc::new(ManualClock::new(1_000)),
            config,
        )
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryPageStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let orchestrator = build(
            store.clone(),
            Some(objects.clone()),
            PublishConfig::default(),
        );
        Harness {
            store,
            objects,
            orchestrator,
        }
    }

    fn anon() -> CallerIdentity {
        CallerIdentity::anonymous("10.0.0.1", "anon_abc")
    }

    #[tokio::test]
    async fn create_requires_some_identity() {
        let h = harness();
        let err = h
            .orchestrator
            .create_page(&CallerIdentity::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::MissingIdentity));

        let err = h
            .orchestrator
            .create_page(&CallerIdentity::anonymous("x", "not-a-token"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::Validation(ValidationError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn first_publish_allocates_hashed_slug() {
        let h = harness();
        let page = h.orchestrator.create_page(&anon()).await.unwrap();

        let outcome = h
            .orchestrator
            .publish(&anon(), &page.id, 1, DOC)
            .await
            .unwrap();

        assert!(outcome.slug.starts_with("user-"));
        assert_eq!(outcome.server_revision, 2);
        assert_eq!(outcome.published_revision, 2);
        assert_eq!(outcome.public_url, format!("http://localhost:8080/p/{}", outcome.slug));
        assert!(outcome.warnings.is_empty());
        assert!(h
            .objects
            .get(&format!("pages/{}/index.html", outcome.slug))
            .is_some());
    }

    #[tokio::test]
    async fn republish_keeps_slug() {
        let h = harness();
        let page = h.orchestrator.create_page(&anon()).await.unwrap();
        let first = h.orchestrator.publish(&anon(), &page.id, 1, DOC).await.unwrap();
        let second = h.orchestrator.publish(&anon(), &page.id, 2, DOC).await.unwrap();
        assert_eq!(first.slug, second.slug);
        assert_eq!(second.published_revision, 3);
        assert_eq!(h.objects.len(), 1);
    }

    #[tokio::test]
    async fn username_seeds_slug_and_collisions_get_suffix() {
        let h = harness();
        h.store
            .put_user(&User {
                id: "u1".to_string(),
                username: Some("alice".to_string()),
                auth_subject: "gh|1".to_string(),
            })
            .await
            .unwrap();
        let alice = CallerIdentity::user("10.0.0.2", "u1");

        let a = h.orchestrator.create_page(&alice).await.unwrap();
        let b = h.orchestrator.create_page(&alice).await.unwrap();
        let first = h.orchestrator.publish(&alice, &a.id, 1, DOC).await.unwrap();
        let second = h.orchestrator.publish(&alice, &b.id, 1, DOC).await.unwrap();

        assert_eq!(first.slug, "alice");
        assert_eq!(second.slug, "alice-2");
    }

    #[tokio::test]
    async fn foreign_caller_is_forbidden() {
        let h = harness();
        let page = h.orchestrator.create_page(&anon()).await.unwrap();
        let intruder = CallerIdentity::anonymous("10.0.0.9", "anon_zzz");
        let err = h
            .orchestrator
            .publish(&intruder, &page.id, 1, DOC)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Forbidden(_)));
        assert!(h.objects.is_empty());
    }

    #[tokio::test]
    async fn invalid_document_has_no_side_effects() {
        let h = harness();
        let page = h.orchestrator.create_page(&anon()).await.unwrap();
        let err = h
            .orchestrator
            .publish(&anon(), &page.id, 1, b"{\"blocks\": 3}")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Validation(_)));
        assert!(h.objects.is_empty());
        assert_eq!(h.store.get_page(&page.id).await.unwrap().unwrap().server_revision, 1);
    }

    #[tokio::test]
    async fn required_storage_failure_aborts_before_commit() {
        let store = Arc::new(MemoryPageStore::new());
        let orchestrator = build(
            store.clone(),
            Some(Arc::new(FailingObjectStore)),
            PublishConfig::default(),
        );
        let page = orchestrator.create_page(&anon()).await.unwrap();
        let err = orchestrator.publish(&anon(), &page.id, 1, DOC).await.unwrap_err();

        assert!(matches!(err, PublishError::StorageUnavailable { .. }));
        let stored = store.get_page(&page.id).await.unwrap().unwrap();
        assert_eq!(stored.server_revision, 1);
        assert!(!stored.is_published);
        assert_eq!(stored.published_revision, None);
    }

    #[tokio::test]
    async fn optional_storage_degrades_to_warning() {
        let orchestrator = harness_with(
            None,
            PublishConfig {
                storage_mode: StorageMode::Optional,
                ..PublishConfig::default()
            },
        );
        let page = orchestrator.create_page(&anon()).await.unwrap();
        let outcome = orchestrator.publish(&anon(), &page.id, 1, DOC).await.unwrap();

        assert_eq!(outcome.artifact_key, None);
        assert!(matches!(
            outcome.warnings.as_slice(),
            [PublishWarning::DegradedArtifact { .. }]
        ));
        let rendered = orchestrator
            .render_published(&outcome.slug)
            .await
            .unwrap()
            .unwrap();
        assert!(rendered.markup.contains("<p>hi</p>"));
    }

    #[tokio::test]
    async fn oversize_artifact_is_validation_error() {
        let orchestrator = harness_with(
            Some(Arc::new(MemoryObjectStore::new())),
            PublishConfig {
                max_artifact_bytes: 16,
                ..PublishConfig::default()
            },
        );
        let page = orchestrator.create_page(&anon()).await.unwrap();
        let err = orchestrator.publish(&anon(), &page.id, 1, DOC).await.unwrap_err();
        assert!(matches!(
            err,
            PublishError::Validation(ValidationError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn stale_base_revision_is_retried_once() {
        let h = harness();
        let page = h.orchestrator.create_page(&anon()).await.unwrap();
        h.orchestrator.save_draft(&anon(), &page.id, 1, DOC).await.unwrap();

        // Caller still believes revision 1; the single retry absorbs it.
        let outcome = h.orchestrator.publish(&anon(), &page.id, 1, DOC).await.unwrap();
        assert_eq!(outcome.server_revision, 3);
    }

    #[tokio::test]
    async fn draft_save_conflicts_without_retry() {
        let h = harness();
        let page = h.orchestrator.create_page(&anon()).await.unwrap();
        h.orchestrator.save_draft(&anon(), &page.id, 1, DOC).await.unwrap();
        let err = h
            .orchestrator
            .save_draft(&anon(), &page.id, 1, DOC)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Conflict { current_revision: 2 }));
    }

    #[tokio::test]
    async fn draft_edits_do_not_touch_published_snapshot() {
        let h = harness();
        let page = h.orchestrator.create_page(&anon()).await.unwrap();
        h.orchestrator.publish(&anon(), &page.id, 1, DOC).await.unwrap();
        let empty = br#"{"blocks":[]}"#;
        h.orchestrator.save_draft(&anon(), &page.id, 2, empty).await.unwrap();

        let stored = h.store.get_page(&page.id).await.unwrap().unwrap();
        assert_eq!(stored.server_revision, 3);
        assert_eq!(stored.published_revision, Some(2));
        assert_eq!(stored.published_content.as_ref().map(Vec::len), Some(1));
        assert!(stored.draft_content.is_empty());
        assert!(stored.has_unpublished_changes());
    }

    #[tokio::test]
    async fn production_without_purge_warns() {
        let orchestrator = harness_with(
            Some(Arc::new(MemoryObjectStore::new())),
            PublishConfig {
                environment: Environment::Production,
                ..PublishConfig::default()
            },
        );
        let page = orchestrator.create_page(&anon()).await.unwrap();
        let outcome = orchestrator.publish(&anon(), &page.id, 1, DOC).await.unwrap();
        assert_eq!(outcome.warnings, vec![PublishWarning::InvalidationUnconfigured]);
    }

    #[tokio::test]
    async fn lists_only_the_callers_pages() {
        let h = harness();
        let mine = h.orchestrator.create_page(&anon()).await.unwrap();
        let other = CallerIdentity::anonymous("10.0.0.9", "anon_zzz");
        h.orchestrator.create_page(&other).await.unwrap();

        let pages = h.orchestrator.list_pages(&anon()).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id, mine.id);
        assert!(matches!(
            h.orchestrator.list_pages(&CallerIdentity::default()).await,
            Err(PublishError::MissingIdentity)
        ));
    }

    #[tokio::test]
    async fn unknown_slug_renders_nothing() {
        let h = harness();
        assert!(h.orchestrator.render_published("nobody").await.unwrap().is_none());
    }
}
