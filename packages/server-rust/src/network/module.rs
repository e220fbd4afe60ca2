//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    claim_handler, create_page_handler, get_page_handler, get_profile_handler, health_handler,
    list_pages_handler, liveness_handler, publish_handler, readiness_handler, save_draft_handler,
    serve_page_handler, set_username_handler, start_session_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::OperationPipeline;

/// Owns the HTTP server lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    pipeline: OperationPipeline,
    dynamic_max_age_secs: u64,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        pipeline: OperationPipeline,
        dynamic_max_age_secs: u64,
    ) -> Self {
        Self {
            config,
            listener: None,
            pipeline,
            dynamic_max_age_secs,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Shared handle for triggering shutdown or reading health elsewhere.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health`, `GET /health/live`, `GET /health/ready`
    /// - `POST /api/session`, `GET /api/me`, `PUT /api/me`
    /// - `POST /api/pages`, `GET /api/pages`, `GET /api/pages/{id}`
    /// - `PUT /api/pages/{id}/draft`, `POST /api/pages/{id}/publish`
    /// - `POST /api/claim`
    /// - `GET /p/{slug}` (and trailing-slash form)
    pub fn build_router(&self) -> Router {
        let state = AppState {
            pipeline: self.pipeline.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            dynamic_max_age_secs: self.dynamic_max_age_secs,
            start_time: Instant::now(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/api/session", post(start_session_handler))
            .route("/api/me", get(get_profile_handler).put(set_username_handler))
            .route("/api/pages", post(create_page_handler).get(list_pages_handler))
            .route("/api/pages/{id}", get(get_page_handler))
            .route("/api/pages/{id}/draft", put(save_draft_handler))
            .route("/api/pages/{id}/publish", post(publish_handler))
            .route("/api/claim", post(claim_handler))
            .route("/p/{slug}", get(serve_page_handler))
            .route("/p/{slug}/", get(serve_page_handler))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener and returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests for
    /// up to `drain_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = Arc::clone(&self.shutdown);

        controller.set_ready();
        info!("serving HTTP");

        let signal_controller = Arc::clone(&controller);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            signal_controller.trigger_shutdown();
        })
        .await?;

        // Covers a server loop that ended without the signal.
        controller.trigger_shutdown();
        if controller.wait_for_drain(self.config.drain_timeout).await {
            info!("all in-flight requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with requests still in flight"
            );
        }
        Ok(())
    }
}
