//! Network configuration types for the `PageDrop` server.

use std::time::Duration;

/// Top-level network configuration for the HTTP adapter.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Largest request body accepted by any route.
    pub max_body_bytes: usize,
    /// How long `serve()` waits for in-flight requests after shutdown.
    pub drain_timeout: Duration,
    /// Take the client address from `x-forwarded-for`. Only safe behind a
    /// proxy that overwrites the header; otherwise the socket peer is used.
    pub trust_forwarded_for: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 1024 * 1024,
            drain_timeout: Duration::from_secs(30),
            trust_forwarded_for: false,
        }
    }
}
