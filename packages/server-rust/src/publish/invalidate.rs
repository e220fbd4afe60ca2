//! Best-effort cache invalidation.
//!
//! After a commit the invalidator asks a [`PurgeBackend`] to drop every URL the
//! slug is reachable under. Nothing here can fail a publish: errors, partial
//! purges, timeouts and missing configuration all come back as
//! [`PublishWarning`]s. Lost purges are bounded by the short `max-age` on
//! dynamically served pages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::artifact::artifact_key;
use super::types::PublishWarning;
use crate::config::{Environment, PublishConfig};

/// Result of one purge call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub purged: Vec<String>,
    pub warnings: Vec<String>,
}

/// CDN or cache purge API.
#[async_trait]
pub trait PurgeBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn purge(&self, urls: &[String]) -> anyhow::Result<PurgeReport>;
}

/// Purge API that accepts `{"files": [...]}` with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpPurgeBackend {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: String,
}

#[derive(Debug, Deserialize)]
struct PurgeResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<PurgeResponseError>,
}

#[derive(Debug, Deserialize)]
struct PurgeResponseError {
    message: String,
}

impl HttpPurgeBackend {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: String, bearer_token: String) -> Self {
        Self {
            client,
            endpoint,
            bearer_token,
        }
    }
}

#[async_trait]
impl PurgeBackend for HttpPurgeBackend {
    fn backend_name(&self) -> &'static str {
        "http"
    }

    async fn purge(&self, urls: &[String]) -> anyhow::Result<PurgeReport> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.bearer_token)
            .json(&serde_json::json!({ "files": urls }))
            .send()
            .await?
            .error_for_status()?;

        // Some purge APIs answer 200 with a failure body.
        match response.json::<PurgeResponse>().await {
            Ok(body) if !body.success => Ok(PurgeReport {
                purged: Vec::new(),
                warnings: if body.errors.is_empty() {
                    vec!["purge API reported failure".to_string()]
                } else {
                    body.errors.into_iter().map(|e| e.message).collect()
                },
            }),
            _ => Ok(PurgeReport {
                purged: urls.to_vec(),
                warnings: Vec::new(),
            }),
        }
    }
}

/// Computes the URLs of a slug and purges them with a bounded timeout.
#[derive(Clone)]
pub struct CacheInvalidator {
    backend: Option<Arc<dyn PurgeBackend>>,
    public_origins: Vec<String>,
    storage_public_url: Option<String>,
    environment: Environment,
    timeout: Duration,
}

impl CacheInvalidator {
    #[must_use]
    pub fn new(backend: Option<Arc<dyn PurgeBackend>>, config: &PublishConfig) -> Self {
        Self {
            backend,
            public_origins: config.public_origins.clone(),
            storage_public_url: config.storage_public_url.clone(),
            environment: config.environment,
            timeout: Duration::from_millis(config.purge_timeout_ms),
        }
    }

    /// Every externally reachable URL of `slug`.
    #[must_use]
    pub fn urls_for(&self, slug: &str) -> Vec<String> {
        let mut urls = Vec::with_capacity(self.public_origins.len() * 2 + 1);
        for origin in &self.public_origins {
            let origin = origin.trim_end_matches('/');
            urls.push(format!("{origin}/p/{slug}"));
            urls.push(format!("{origin}/p/{slug}/"));
        }
        if let Some(base) = &self.storage_public_url {
            urls.push(format!("{}/{}", base.trim_end_matches('/'), artifact_key(slug)));
        }
        urls
    }

    /// Purges `slug`, converting every failure into a warning.
    pub async fn invalidate(&self, slug: &str) -> Vec<PublishWarning> {
        let Some(backend) = &self.backend else {
            if self.environment == Environment::Production {
                tracing::warn!(slug, "no purge backend configured in production");
                return vec![PublishWarning::InvalidationUnconfigured];
            }
            return Vec::new();
        };

        let urls = self.urls_for(slug);
        if urls.is_empty() {
            return Vec::new();
        }

        let (outcome, warnings) =
            match tokio::time::timeout(self.timeout, backend.purge(&urls)).await {
                Ok(Ok(report)) if report.warnings.is_empty() => ("ok", Vec::new()),
                Ok(Ok(report)) => (
                    "partial",
                    report
                        .warnings
                        .into_iter()
                        .map(|reason| PublishWarning::Invalidation { reason })
                        .collect(),
                ),
                Ok(Err(e)) => (
                    "error",
                    vec![PublishWarning::Invalidation {
                        reason: e.to_string(),
                    }],
                ),
                Err(_elapsed) => (
                    "timeout",
                    vec![PublishWarning::Invalidation {
                        reason: format!("purge timed out after {}ms", self.timeout.as_millis()),
                    }],
                ),
            };

        metrics::counter!("pagedrop_purges_total", "outcome" => outcome).increment(1);
        if warnings.is_empty() {
            tracing::debug!(slug, urls = urls.len(), backend = backend.backend_name(), "cache purged");
        } else {
            tracing::warn!(slug, outcome, backend = backend.backend_name(), "cache purge degraded");
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl PurgeBackend for RecordingBackend {
        fn backend_name(&self) -> &'static str {
            "recording"
        }

        async fn purge(&self, urls: &[String]) -> anyhow::Result<PurgeReport> {
            self.calls.lock().push(urls.to_vec());
            Ok(PurgeReport {
                purged: urls.to_vec(),
                warnings: Vec::new(),
            })
        }
    }

    struct PartialBackend;

    #[async_trait]
    impl PurgeBackend for PartialBackend {
        fn backend_name(&self) -> &'static str {
            "partial"
        }

        async fn purge(&self, urls: &[String]) -> anyhow::Result<PurgeReport> {
            Ok(PurgeReport {
                purged: urls[..1].to_vec(),
                warnings: vec!["rate limited by CDN".to_string()],
            })
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl PurgeBackend for SlowBackend {
        fn backend_name(&self) -> &'static str {
            "slow"
        }

        async fn purge(&self, _urls: &[String]) -> anyhow::Result<PurgeReport> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PurgeReport::default())
        }
    }

    fn config() -> PublishConfig {
        PublishConfig {
            public_origins: vec![
                "https://pagedrop.app".to_string(),
                "https://www.pagedrop.app/".to_string(),
            ],
            storage_public_url: Some("https://cdn.example.com/bucket/".to_string()),
            purge_timeout_ms: 100,
            ..PublishConfig::default()
        }
    }

    #[test]
    fn urls_cover_every_origin_and_storage() {
        let invalidator = CacheInvalidator::new(None, &config());
        assert_eq!(
            invalidator.urls_for("alice"),
            vec![
                "https://pagedrop.app/p/alice",
                "https://pagedrop.app/p/alice/",
                "https://www.pagedrop.app/p/alice",
                "https://www.pagedrop.app/p/alice/",
                "https://cdn.example.com/bucket/pages/alice/index.html",
            ]
        );
    }

    #[tokio::test]
    async fn successful_purge_has_no_warnings() {
        let backend = Arc::new(RecordingBackend::default());
        let invalidator = CacheInvalidator::new(Some(backend.clone()), &config());
        assert!(invalidator.invalidate("alice").await.is_empty());
        assert_eq!(backend.calls.lock().len(), 1);
        assert_eq!(backend.calls.lock()[0].len(), 5);
    }

    #[tokio::test]
    async fn partial_purge_becomes_warning() {
        let invalidator = CacheInvalidator::new(Some(Arc::new(PartialBackend)), &config());
        let warnings = invalidator.invalidate("alice").await;
        assert_eq!(
            warnings,
            vec![PublishWarning::Invalidation {
                reason: "rate limited by CDN".to_string()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_purge_times_out_into_warning() {
        let invalidator = CacheInvalidator::new(Some(Arc::new(SlowBackend)), &config());
        let warnings = invalidator.invalidate("alice").await;
        assert!(matches!(
            warnings.as_slice(),
            [PublishWarning::Invalidation { reason }] if reason.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn unconfigured_only_warns_in_production() {
        let dev = CacheInvalidator::new(None, &config());
        assert!(dev.invalidate("alice").await.is_empty());

        let prod = CacheInvalidator::new(
            None,
            &PublishConfig {
                environment: Environment::Production,
                ..config()
            },
        );
        assert_eq!(
            prod.invalidate("alice").await,
            vec![PublishWarning::InvalidationUnconfigured]
        );
    }
}
