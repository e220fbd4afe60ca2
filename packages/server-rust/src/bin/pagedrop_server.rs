//! `PageDrop` server binary.
//!
//! Every flag has an environment fallback so the same image runs locally and
//! behind an orchestrator.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use pagedrop_core::{Clock, SystemClock};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pagedrop_server::accounts::Accounts;
use pagedrop_server::admission::{AdmissionController, CounterStore, MemoryCounterStore};
use pagedrop_server::cleanup::AnonymousSweeper;
use pagedrop_server::config::{Environment, ServerConfig, StorageMode};
use pagedrop_server::network::{NetworkConfig, NetworkModule};
use pagedrop_server::ownership::OwnershipClaims;
use pagedrop_server::publish::{
    ArtifactPublisher, CacheInvalidator, FsObjectStore, HttpObjectStore, HttpPurgeBackend,
    ObjectStore, PublishOrchestrator, PurgeBackend, StaticHtmlRenderer,
};
use pagedrop_server::service::{OperationPipeline, PageService};
use pagedrop_server::storage::{MemoryPageStore, PageStore, TimedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    Redb,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "pagedrop-server", version, about = "PageDrop publish server")]
struct Args {
    #[arg(long, env = "PAGEDROP_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PAGEDROP_PORT", default_value_t = 8080)]
    port: u16,

    /// Revision store engine.
    #[arg(long, env = "PAGEDROP_STORE", value_enum, default_value_t = StoreKind::Redb)]
    store: StoreKind,

    /// Database file for the redb engine.
    #[arg(long, env = "PAGEDROP_DATA_PATH", default_value = "pagedrop.redb")]
    data_path: PathBuf,

    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "PAGEDROP_DB_MAX_CONNECTIONS", default_value_t = 10)]
    db_max_connections: u32,

    /// Write artifacts to this directory.
    #[arg(long, env = "PAGEDROP_ARTIFACT_DIR", conflicts_with = "object_store_url")]
    artifact_dir: Option<PathBuf>,

    /// PUT artifacts to this bucket endpoint.
    #[arg(long, env = "PAGEDROP_OBJECT_STORE_URL")]
    object_store_url: Option<String>,

    #[arg(long, env = "PAGEDROP_OBJECT_STORE_TOKEN", hide_env_values = true)]
    object_store_token: Option<String>,

    /// Public base URL of the artifact bucket.
    #[arg(long, env = "PAGEDROP_STORAGE_PUBLIC_URL")]
    storage_public_url: Option<String>,

    /// Let publishes commit when the artifact upload fails.
    #[arg(long, env = "PAGEDROP_STORAGE_OPTIONAL")]
    storage_optional: bool,

    #[arg(long, env = "PAGEDROP_PRODUCTION")]
    production: bool,

    /// Public origins pages are served under; the first builds public URLs.
    #[arg(
        long,
        env = "PAGEDROP_PUBLIC_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:8080"
    )]
    public_origins: Vec<String>,

    #[arg(long, env = "PAGEDROP_PURGE_URL", requires = "purge_token")]
    purge_url: Option<String>,

    #[arg(long, env = "PAGEDROP_PURGE_TOKEN", hide_env_values = true)]
    purge_token: Option<String>,

    #[arg(long, env = "PAGEDROP_DISABLE_RATE_LIMITS")]
    disable_rate_limits: bool,

    #[arg(long, env = "PAGEDROP_CLEANUP_PROBABILITY", default_value_t = 0.01)]
    cleanup_probability: f64,

    #[arg(long, env = "PAGEDROP_MAX_CONCURRENT_OPERATIONS", default_value_t = 1000)]
    max_concurrent_operations: u32,

    #[arg(long, env = "PAGEDROP_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Use `x-forwarded-for` as the client address (only behind a proxy that
    /// sets it).
    #[arg(long, env = "PAGEDROP_TRUST_FORWARDED_FOR")]
    trust_forwarded_for: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "PAGEDROP_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "PAGEDROP_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig {
            max_concurrent_operations: self.max_concurrent_operations,
            ..ServerConfig::default()
        };
        config.publish.storage_mode = if self.storage_optional {
            StorageMode::Optional
        } else {
            StorageMode::Required
        };
        config.publish.environment = if self.production {
            Environment::Production
        } else {
            Environment::Development
        };
        config.publish.public_origins.clone_from(&self.public_origins);
        config.publish.storage_public_url.clone_from(&self.storage_public_url);
        config.admission.enabled = !self.disable_rate_limits;
        config.cleanup.probability = self.cleanup_probability;
        config
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            trust_forwarded_for: self.trust_forwarded_for,
            ..NetworkConfig::default()
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

/// Page store engine plus, for Postgres, a counter store sharing its pool.
async fn open_stores(
    args: &Args,
    clock: &Arc<dyn Clock>,
) -> anyhow::Result<(Arc<dyn PageStore>, Arc<dyn CounterStore>)> {
    let memory_counters = || -> Arc<dyn CounterStore> {
        Arc::new(MemoryCounterStore::new(Arc::clone(clock)))
    };

    match args.store {
        StoreKind::Memory => {
            let store: Arc<dyn PageStore> = Arc::new(MemoryPageStore::new());
            Ok((store, memory_counters()))
        }
        StoreKind::Redb => open_redb(&args.data_path).map(|store| (store, memory_counters())),
        StoreKind::Postgres => open_postgres(args, clock).await,
    }
}

#[cfg(feature = "redb")]
fn open_redb(path: &std::path::Path) -> anyhow::Result<Arc<dyn PageStore>> {
    let store = pagedrop_server::storage::RedbPageStore::open(path)
        .with_context(|| format!("opening redb database at {}", path.display()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redb"))]
fn open_redb(_path: &std::path::Path) -> anyhow::Result<Arc<dyn PageStore>> {
    anyhow::bail!("this build does not include the redb engine")
}

#[cfg(feature = "postgres")]
async fn open_postgres(
    args: &Args,
    clock: &Arc<dyn Clock>,
) -> anyhow::Result<(Arc<dyn PageStore>, Arc<dyn CounterStore>)> {
    use pagedrop_server::admission::PostgresCounterStore;
    use pagedrop_server::storage::PostgresPageStore;

    let url = args
        .database_url
        .as_deref()
        .context("--database-url is required for the postgres store")?;
    let store = PostgresPageStore::connect(url, args.db_max_connections).await?;
    let counters = PostgresCounterStore::new(store.pool(), Arc::clone(clock));
    Ok((Arc::new(store), Arc::new(counters)))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(
    _args: &Args,
    _clock: &Arc<dyn Clock>,
) -> anyhow::Result<(Arc<dyn PageStore>, Arc<dyn CounterStore>)> {
    anyhow::bail!("this build does not include the postgres engine")
}

fn object_store(args: &Args, client: &reqwest::Client) -> Option<Arc<dyn ObjectStore>> {
    if let Some(dir) = &args.artifact_dir {
        return Some(Arc::new(FsObjectStore::new(dir.clone())));
    }
    args.object_store_url.as_deref().map(|url| {
        Arc::new(HttpObjectStore::new(
            client.clone(),
            url,
            args.object_store_token.clone(),
        )) as Arc<dyn ObjectStore>
    })
}

fn purge_backend(args: &Args, client: &reqwest::Client) -> Option<Arc<dyn PurgeBackend>> {
    match (&args.purge_url, &args.purge_token) {
        (Some(url), Some(token)) => Some(Arc::new(HttpPurgeBackend::new(
            client.clone(),
            url.clone(),
            token.clone(),
        ))),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let config = args.server_config();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http = reqwest::Client::builder()
        .user_agent(concat!("pagedrop-server/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;

    let (engine, counters) = open_stores(&args, &clock).await?;
    engine.initialize().await.context("initializing page store")?;
    counters.init().await.context("initializing counter store")?;
    let store: Arc<dyn PageStore> =
        Arc::new(TimedStore::new(engine, config.publish.store_timeout()));

    let objects = object_store(&args, &http);
    info!(
        store = ?args.store,
        object_store = objects.as_ref().map_or("none", |s| s.backend_name()),
        storage_mode = ?config.publish.storage_mode,
        "starting pagedrop server"
    );

    let orchestrator = PublishOrchestrator::new(
        Arc::clone(&store),
        Arc::new(StaticHtmlRenderer),
        ArtifactPublisher::new(
            objects,
            config.publish.max_artifact_bytes,
            Duration::from_millis(config.publish.upload_timeout_ms),
        ),
        CacheInvalidator::new(purge_backend(&args, &http), &config.publish),
        Arc::clone(&clock),
        config.publish.clone(),
    );
    let claims = OwnershipClaims::new(Arc::clone(&store), Arc::clone(&clock), config.claims.clone());
    let sweeper = AnonymousSweeper::new(Arc::clone(&store), Arc::clone(&clock), config.cleanup.clone());
    let admission = AdmissionController::new(counters, config.admission.clone());

    let pipeline = OperationPipeline::new(
        PageService::new(
            Arc::new(orchestrator),
            Arc::new(claims),
            Arc::new(Accounts::new(Arc::clone(&store))),
            Some(sweeper),
        ),
        Arc::new(admission),
        &config,
    );

    let mut network = NetworkModule::new(
        args.network_config(),
        pipeline,
        u64::from(config.publish.dynamic_max_age_secs),
    );
    let port = network.start().await?;
    info!(port, "listening");

    network
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    store.close().await.context("closing page store")?;
    Ok(())
}
