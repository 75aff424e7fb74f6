//! API Server
//!
//! HTTP surface for the trading backoffice's access-control pipeline.
//!
//! # Features
//!
//! - **Permissions**: role and grant administration, per-principal checks
//! - **Rate limiting**: sliding-window quotas with `X-RateLimit-*` headers
//! - **Audit logs**: filtered queries, statistics, CSV/JSON export, retention
//!
//! Authentication happens upstream: a `Principal` found in request
//! extensions is treated as authenticated. Deployments behind a trusted
//! gateway can set `PRINCIPAL_HEADER` to resolve principals from a header.
//!
//! # Example
//!
//! ```ignore
//! use api_server::{ApiServer, ServerConfig};
//! use backoffice_core::config::Config;
//!
//! let server = ApiServer::new(ServerConfig::from_env(), Config::from_env()?, pool).await?;
//! server.run().await?;
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod retention;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use retention::{spawn_retention_job, RetentionConfig};
pub use routes::create_router;
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Request};
use backoffice_core::config::Config;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use crate::middleware::{gateway_principal, GatewayPrincipal};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for all origins (development only).
    pub cors_permissive: bool,
    /// Header carrying a principal id asserted by a trusted gateway.
    pub principal_header: Option<String>,
    /// Seed built-in roles and grants into an empty store on startup.
    pub seed_defaults: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_permissive: true,
            principal_header: None,
            seed_defaults: true,
        }
    }
}

impl ServerConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            // PORT first (platform-assigned), then API_PORT
            port: std::env::var("PORT")
                .or_else(|_| std::env::var("API_PORT"))
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            cors_permissive: std::env::var("CORS_PERMISSIVE")
                .map(|v| v == "true")
                .unwrap_or(true),
            principal_header: std::env::var("PRINCIPAL_HEADER")
                .ok()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty()),
            seed_defaults: std::env::var("SEED_DEFAULT_PERMISSIONS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// The API server.
pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server backed by PostgreSQL.
    pub async fn new(config: ServerConfig, app_config: Config, pool: PgPool) -> anyhow::Result<Self> {
        let state = AppState::new(pool, app_config).await?;
        Ok(Self::with_state(config, state))
    }

    /// Create a server over prepared state.
    pub fn with_state(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Run the server.
    pub async fn run(self) -> anyhow::Result<()> {
        let state = self.state;

        if self.config.seed_defaults {
            match state.resolver.initialize_default_permissions().await {
                Ok(0) => info!("Role permissions already present, skipping seed"),
                Ok(created) => info!(created, "Seeded default role permissions"),
                Err(e) => warn!(error = %e, "Failed to seed default role permissions"),
            }
        }

        let mut router = create_router(state.clone());

        if let Some(header) = &self.config.principal_header {
            let header = HeaderName::from_bytes(header.as_bytes())?;
            info!(header = %header, "Resolving principals from gateway header");
            router = router.layer(axum::middleware::from_fn_with_state(
                GatewayPrincipal {
                    store: state.store.clone(),
                    header,
                },
                gateway_principal,
            ));
        }

        let router = router
            .layer(
                TraceLayer::new_for_http()
                    .on_request(|request: &Request<_>, _span: &tracing::Span| {
                        tracing::info!(
                            method = %request.method(),
                            uri = %request.uri(),
                            "Incoming request"
                        );
                    })
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG))
                    .on_failure(
                        |error: tower_http::classify::ServerErrorsFailureClass,
                         latency: std::time::Duration,
                         _span: &tracing::Span| {
                            tracing::error!(
                                error = %error,
                                latency_ms = latency.as_millis(),
                                "Request failed"
                            );
                        },
                    ),
            )
            .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB
            .layer(if self.config.cors_permissive {
                CorsLayer::permissive()
            } else {
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            });

        // ── Spawn background tasks ──
        spawn_retention_job(
            RetentionConfig::from_env(state.config.audit.retention_days),
            state.audit_logger.clone(),
        );

        let addr = self.config.socket_addr()?;
        info!(address = %addr, "Starting API server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}
