//! Application state shared across handlers.

use auth::{
    AuditInterceptor, AuditLogger, AuditStorage, MemoryAuditStorage, MemoryPermissionStore,
    PermissionResolver, PermissionStore, PostgresAuditStorage, PostgresPermissionStore,
    RateLimiter,
};
use backoffice_core::config::Config;
use backoffice_core::{Cache, MemoryCache, RedisCache};
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (absent for in-memory deployments and tests).
    pub pool: Option<PgPool>,
    /// Application configuration.
    pub config: Config,
    /// Shared TTL cache backing permission lookups and rate-limit windows.
    pub cache: Arc<dyn Cache>,
    /// Principals, roles and grants.
    pub store: Arc<dyn PermissionStore>,
    /// Role/resource permission resolver.
    pub resolver: Arc<PermissionResolver>,
    /// Sliding-window request limiter.
    pub rate_limiter: Arc<RateLimiter>,
    /// Audit logger for security and compliance logging.
    pub audit_logger: Arc<AuditLogger>,
    /// Records request outcomes against the audit log.
    pub interceptor: Arc<AuditInterceptor>,
}

impl AppState {
    /// Create state backed by PostgreSQL and, when configured, Redis.
    pub async fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let cache: Arc<dyn Cache> = match &config.redis.url {
            Some(url) => match RedisCache::connect(url).await {
                Ok(cache) => {
                    tracing::info!("Using Redis for the shared cache");
                    Arc::new(cache)
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Failed to connect to Redis. Falling back to in-memory cache."
                    );
                    Arc::new(MemoryCache::new())
                }
            },
            None => Arc::new(MemoryCache::new()),
        };

        let store: Arc<dyn PermissionStore> = Arc::new(PostgresPermissionStore::new(pool.clone()));
        let audit_storage: Arc<dyn AuditStorage> =
            Arc::new(PostgresAuditStorage::new(pool.clone()));

        let mut state = Self::from_parts(store, audit_storage, cache, config);
        state.pool = Some(pool);
        Ok(state)
    }

    /// Assemble state from explicit backends.
    pub fn from_parts(
        store: Arc<dyn PermissionStore>,
        audit_storage: Arc<dyn AuditStorage>,
        cache: Arc<dyn Cache>,
        config: Config,
    ) -> Self {
        let resolver = Arc::new(PermissionResolver::new(
            store.clone(),
            cache.clone(),
            config.permissions.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(cache.clone(), config.rate_limit.clone()));
        let audit_logger = Arc::new(AuditLogger::new(
            audit_storage,
            config.audit.channel_capacity,
        ));
        let interceptor = Arc::new(AuditInterceptor::new(audit_logger.clone()));

        Self {
            pool: None,
            config,
            cache,
            store,
            resolver,
            rate_limiter,
            audit_logger,
            interceptor,
        }
    }

    /// State with every backend held in process memory.
    pub fn in_memory(config: Config) -> Self {
        Self::from_parts(
            Arc::new(MemoryPermissionStore::new()),
            Arc::new(MemoryAuditStorage::new()),
            Arc::new(MemoryCache::new()),
            config,
        )
    }
}
