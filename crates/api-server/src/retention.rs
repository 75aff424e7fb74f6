//! Scheduled audit log retention.
//!
//! Purges audit entries older than the configured retention period once per
//! interval. A failed purge is logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use auth::AuditLogger;

/// Configuration for the retention job (env-var driven).
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Whether the retention job runs at all.
    pub enabled: bool,
    /// Entries older than this many days are purged.
    pub retention_days: u32,
    /// How often to purge (seconds).
    pub interval_secs: u64,
}

impl RetentionConfig {
    pub fn new(retention_days: u32) -> Self {
        Self {
            enabled: true,
            retention_days,
            interval_secs: 24 * 60 * 60,
        }
    }

    /// Create config from environment variables.
    pub fn from_env(retention_days: u32) -> Self {
        let defaults = Self::new(retention_days);
        Self {
            enabled: std::env::var("AUDIT_RETENTION_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.enabled),
            retention_days,
            interval_secs: std::env::var("AUDIT_RETENTION_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.interval_secs),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// One purge pass. Returns the number of entries deleted.
pub async fn run_retention_once(logger: &AuditLogger, retention_days: u32) -> u64 {
    match logger.delete_old_logs(retention_days).await {
        Ok(deleted) => deleted,
        Err(e) => {
            error!(error = %e, retention_days, "Audit retention purge failed");
            0
        }
    }
}

/// Spawn the retention job. The first purge runs immediately.
pub fn spawn_retention_job(config: RetentionConfig, logger: Arc<AuditLogger>) -> Option<JoinHandle<()>> {
    if !config.enabled {
        info!("Audit retention job disabled");
        return None;
    }

    let task_config = config.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(task_config.interval());
        loop {
            ticker.tick().await;
            run_retention_once(&logger, task_config.retention_days).await;
        }
    });

    info!(
        retention_days = config.retention_days,
        interval_secs = config.interval_secs,
        "Audit retention job spawned as background task"
    );
    Some(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::{AuditLogEntry, AuditStorage, MemoryAuditStorage};
    use backoffice_core::types::AuditAction;
    use chrono::{Duration as ChronoDuration, Utc};

    #[tokio::test]
    async fn test_purge_removes_only_expired_entries() {
        let storage = Arc::new(MemoryAuditStorage::new());
        let logger = AuditLogger::new(storage.clone(), 16);

        let old = AuditLogEntry::builder(AuditAction::Login, "session")
            .occurred_at(Utc::now() - ChronoDuration::days(40))
            .build();
        let fresh = AuditLogEntry::builder(AuditAction::Login, "session").build();
        storage.store(&old).await.unwrap();
        storage.store(&fresh).await.unwrap();

        assert_eq!(run_retention_once(&logger, 30).await, 1);
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_retention_is_logged_not_fatal() {
        let logger = AuditLogger::new(Arc::new(MemoryAuditStorage::new()), 16);
        assert_eq!(run_retention_once(&logger, 0).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_job_is_not_spawned() {
        let logger = Arc::new(AuditLogger::new(Arc::new(MemoryAuditStorage::new()), 16));
        let mut config = RetentionConfig::new(365);
        config.enabled = false;
        assert!(spawn_retention_job(config, logger).is_none());
    }
}
