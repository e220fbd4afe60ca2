//! Artifact publishing.
//!
//! [`ArtifactPublisher`] writes rendered markup to an [`ObjectStore`] under a
//! key derived only from the slug, so republishing a slug overwrites its
//! artifact in place. A publish must not reach the revision-store commit
//! unless [`ArtifactPublisher::publish`] returned `Ok` (or storage is
//! explicitly optional).

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Content type of every page artifact.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Object key of the artifact published under `slug`.
#[must_use]
pub fn artifact_key(slug: &str) -> String {
    format!("pages/{slug}/index.html")
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Durable object storage with idempotent overwrite semantics.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Stores `body` under `key`, replacing any previous object.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
}

/// Object stored by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

/// In-process object store for tests and single-node development.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}

/// Object store rooted at a local directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never sees a half-written artifact.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("object key escapes the store root: {key}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn backend_name(&self) -> &'static str {
        "fs"
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// S3-compatible bucket reached with plain HTTP `PUT`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpObjectStore {
    /// `endpoint` is the bucket base URL; keys are appended as path segments.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: &str, bearer_token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bearer_token,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn backend_name(&self) -> &'static str {
        "http"
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        let mut request = self
            .client
            .put(format!("{}/{key}", self.endpoint))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CACHE_CONTROL, "public, max-age=60")
            .body(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ArtifactPublisher
// ---------------------------------------------------------------------------

/// Errors from [`ArtifactPublisher::publish`].
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("no object store configured")]
    Unconfigured,
    #[error("rendered artifact is {actual} bytes, limit is {limit}")]
    TooLarge { actual: usize, limit: usize },
    #[error("artifact upload timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("artifact upload failed: {0}")]
    Upload(#[from] anyhow::Error),
}

/// Proof that an artifact is in durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReceipt {
    pub key: String,
    pub bytes: usize,
    /// Hex SHA-256 of the stored body.
    pub sha256: String,
}

/// Uploads rendered pages with a size cap and a bounded timeout.
#[derive(Clone)]
pub struct ArtifactPublisher {
    store: Option<Arc<dyn ObjectStore>>,
    max_bytes: usize,
    timeout: Duration,
}

impl ArtifactPublisher {
    /// `store` is `None` when no object storage is configured.
    #[must_use]
    pub fn new(store: Option<Arc<dyn ObjectStore>>, max_bytes: usize, timeout: Duration) -> Self {
        Self {
            store,
            max_bytes,
            timeout,
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    /// Stores `markup` as the artifact for `slug`.
    ///
    /// # Errors
    ///
    /// [`ArtifactError::TooLarge`] before any I/O when the markup exceeds the
    /// size cap, [`ArtifactError::Unconfigured`] without a store, otherwise
    /// the upload failure or timeout.
    pub async fn publish(&self, slug: &str, markup: String) -> Result<ArtifactReceipt, ArtifactError> {
        if markup.len() > self.max_bytes {
            return Err(ArtifactError::TooLarge {
                actual: markup.len(),
                limit: self.max_bytes,
            });
        }
        let Some(store) = &self.store else {
            return Err(ArtifactError::Unconfigured);
        };

        let key = artifact_key(slug);
        let body = Bytes::from(markup);
        let receipt = ArtifactReceipt {
            key: key.clone(),
            bytes: body.len(),
            sha256: hex::encode(Sha256::digest(&body)),
        };

        match tokio::time::timeout(self.timeout, store.put(&key, body, HTML_CONTENT_TYPE)).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    backend = store.backend_name(),
                    key = %receipt.key,
                    bytes = receipt.bytes,
                    "artifact stored"
                );
                Ok(receipt)
            }
            Ok(Err(e)) => Err(ArtifactError::Upload(e)),
            Err(_elapsed) => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = self.timeout.as_millis() as u64;
                Err(ArtifactError::Timeout { timeout_ms })
            }
        }
    }
}
