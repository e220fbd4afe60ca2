//! Server configuration.
//!
//! Plain structs with production-leaning defaults. The binary maps command-line
//! arguments and environment variables onto them; tests build them directly
//! with struct-update syntax.

use std::collections::HashMap;
use std::time::Duration;

use pagedrop_core::DocumentLimits;

/// Operation keys shared by the pipeline, admission quotas and metrics labels.
pub mod operation_keys {
    pub const CREATE_PAGE: &str = "create_page";
    pub const GET_PAGE: &str = "get_page";
    pub const SAVE_DRAFT: &str = "save_draft";
    pub const PUBLISH: &str = "publish";
    pub const CLAIM: &str = "claim";
    pub const UPDATE_PROFILE: &str = "update_profile";
    pub const START_SESSION: &str = "start_session";
}

/// Whether a publish may commit without a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Upload must succeed before the commit runs.
    #[default]
    Required,
    /// Upload failures (or no object store at all) degrade to a warning and
    /// the page is served dynamically.
    Optional,
}

/// Deployment environment. Only affects which misconfigurations are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Publish pipeline settings.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub storage_mode: StorageMode,
    pub environment: Environment,
    /// Origins the public page is reachable under, e.g. `https://pagedrop.app`.
    /// The first one is used to build `public_url`.
    pub public_origins: Vec<String>,
    /// Public base URL of the object store bucket, if artifacts are directly
    /// reachable there too.
    pub storage_public_url: Option<String>,
    pub limits: DocumentLimits,
    /// Largest rendered artifact accepted for upload.
    pub max_artifact_bytes: usize,
    pub upload_timeout_ms: u64,
    pub purge_timeout_ms: u64,
    /// Bound on every individual revision store call.
    pub store_timeout_ms: u64,
    /// Numeric suffixes tried (`-2` up to `-{n+1}`) before the random fallback.
    pub max_suffix_attempts: u32,
    /// `max-age` of dynamically served pages; bounds staleness when a purge
    /// is lost.
    pub dynamic_max_age_secs: u32,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::Required,
            environment: Environment::Development,
            public_origins: vec!["http://localhost:8080".to_string()],
            storage_public_url: None,
            limits: DocumentLimits::default(),
            max_artifact_bytes: 2 * 1024 * 1024,
            upload_timeout_ms: 10_000,
            purge_timeout_ms: 5_000,
            store_timeout_ms: 5_000,
            max_suffix_attempts: 20,
            dynamic_max_age_secs: 60,
        }
    }
}

impl PublishConfig {
    /// Public URL of `slug` on the primary origin.
    #[must_use]
    pub fn public_url(&self, slug: &str) -> String {
        let origin = self
            .public_origins
            .first()
            .map_or("", |o| o.trim_end_matches('/'));
        format!("{origin}/p/{slug}")
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Fixed-window quota for one operation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub window: Duration,
}

impl Quota {
    #[must_use]
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
        }
    }
}

/// Admission controller settings.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub enabled: bool,
    /// Quotas by operation key. Operations without an entry are not limited.
    pub quotas: HashMap<String, Quota>,
    /// Bound on a single counter-store round trip; exceeding it fails open.
    pub backend_timeout_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let quotas = [
            (operation_keys::PUBLISH, Quota::per_minute(10)),
            (operation_keys::SAVE_DRAFT, Quota::per_minute(120)),
            (operation_keys::CREATE_PAGE, Quota::per_minute(30)),
            (operation_keys::CLAIM, Quota::per_minute(10)),
            (operation_keys::UPDATE_PROFILE, Quota::per_minute(10)),
            (operation_keys::START_SESSION, Quota::per_minute(30)),
        ]
        .into_iter()
        .map(|(key, quota)| (key.to_string(), quota))
        .collect();

        Self {
            enabled: true,
            quotas,
            backend_timeout_ms: 250,
        }
    }
}

/// Lazy anonymous-draft cleanup settings.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Chance, per handled request, that a sweep is started.
    pub probability: f64,
    /// Anonymous drafts untouched for longer than this are deleted.
    pub stale_after_ms: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            probability: 0.01,
            stale_after_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// Ownership claim settings.
#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Anonymous tokens older than this can no longer claim pages.
    pub max_claim_age_ms: i64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_claim_age_ms: 30 * 24 * 60 * 60 * 1000,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Identifier of this instance, used in logs.
    pub node_id: String,
    /// Default timeout for operations in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    pub publish: PublishConfig,
    pub admission: AdmissionConfig,
    pub cleanup: CleanupConfig,
    pub claims: ClaimConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            publish: PublishConfig::default(),
            admission: AdmissionConfig::default(),
            cleanup: CleanupConfig::default(),
            claims: ClaimConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_uses_first_origin() {
        let config = PublishConfig {
            public_origins: vec![
                "https://pagedrop.app/".to_string(),
                "https://www.pagedrop.app".to_string(),
            ],
            ..PublishConfig::default()
        };
        assert_eq!(config.public_url("hello"), "https://pagedrop.app/p/hello");
    }

    #[test]
    fn default_quotas_cover_publish_and_claim() {
        let config = AdmissionConfig::default();
        assert_eq!(config.quotas[operation_keys::PUBLISH].limit, 10);
        assert!(config.quotas.contains_key(operation_keys::CLAIM));
        assert!(!config.quotas.contains_key(operation_keys::GET_PAGE));
    }

    #[test]
    fn storage_is_required_by_default() {
        assert_eq!(PublishConfig::default().storage_mode, StorageMode::Required);
    }
}
