//! Records an audit entry once a guarded operation has resolved.
//!
//! The write happens after the operation finishes, whether it succeeded or
//! not, and a failed audit write never changes the operation's result.

use backoffice_core::types::AuditAction;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::error;

use crate::audit::{AuditLogEntry, AuditLogger};
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};

/// What a guarded operation is, for the audit trail.
#[derive(Debug, Clone)]
pub struct AuditedOperation {
    pub action: AuditAction,
    pub resource: String,
    pub details: Value,
}

impl AuditedOperation {
    pub fn new(action: AuditAction, resource: impl Into<String>) -> Self {
        Self {
            action,
            resource: resource.into(),
            details: json!({}),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Why an operation did not succeed, detached from the error type so it can
/// travel through response extensions.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditFailure {
    /// Access refused: recorded under the denial's own action.
    Denied {
        action: AuditAction,
        reason: String,
        details: Value,
    },
    /// Anything else: recorded under the operation's action.
    Failed { reason: String },
}

impl AuditFailure {
    pub fn from_error(err: &AccessError) -> Self {
        match err {
            AccessError::PermissionDenied { resource, permission } => AuditFailure::Denied {
                action: AuditAction::PermissionDenied,
                reason: err.to_string(),
                details: json!({ "resource": resource, "permission": permission }),
            },
            AccessError::MenuAccessDenied { menu_key } => AuditFailure::Denied {
                action: AuditAction::MenuAccessDenied,
                reason: err.to_string(),
                details: json!({ "menuKey": menu_key }),
            },
            AccessError::PrincipalNotFound { principal_id }
            | AccessError::PrincipalInactive { principal_id } => AuditFailure::Denied {
                action: AuditAction::PermissionDenied,
                reason: err.to_string(),
                details: json!({ "principalId": principal_id }),
            },
            AccessError::RateLimitExceeded { status } | AccessError::RequestTooFrequent { status } => {
                AuditFailure::Denied {
                    action: AuditAction::RateLimitExceeded,
                    reason: err.to_string(),
                    details: json!({
                        "limit": status.limit,
                        "count": status.count,
                        "resetAt": status.reset_epoch_secs(),
                    }),
                }
            }
            other => AuditFailure::Failed {
                reason: other.to_string(),
            },
        }
    }
}

pub struct AuditInterceptor {
    logger: Arc<AuditLogger>,
}

impl AuditInterceptor {
    pub fn new(logger: Arc<AuditLogger>) -> Self {
        Self { logger }
    }

    /// Entry describing how `op` ended for the request in `ctx`.
    pub fn entry_for(
        ctx: &RequestContext,
        op: &AuditedOperation,
        failure: Option<&AuditFailure>,
    ) -> AuditLogEntry {
        let builder = match failure {
            None => AuditLogEntry::builder(op.action, op.resource.clone()).details(op.details.clone()),
            Some(AuditFailure::Denied {
                action,
                reason,
                details,
            }) => AuditLogEntry::builder(*action, op.resource.clone())
                .details(json!({
                    "operation": op.action,
                    "path": ctx.path,
                    "denial": details,
                }))
                .failure(reason.clone()),
            Some(AuditFailure::Failed { reason }) => {
                AuditLogEntry::builder(op.action, op.resource.clone())
                    .details(op.details.clone())
                    .failure(reason.clone())
            }
        };

        builder.context(ctx).build()
    }

    /// Run `operation`, record its outcome, and hand its result back unchanged.
    pub async fn run<T, F>(
        &self,
        ctx: &RequestContext,
        op: AuditedOperation,
        operation: F,
    ) -> AccessResult<T>
    where
        F: Future<Output = AccessResult<T>>,
    {
        let result = operation.await;

        let failure = result.as_ref().err().map(AuditFailure::from_error);
        let entry = Self::entry_for(ctx, &op, failure.as_ref());
        if let Err(e) = self.logger.log_activity(entry).await {
            error!(error = %e, action = %op.action, "Audit write after operation failed");
        }

        result
    }

    /// Queue the entry on the logger's bounded channel; the caller never
    /// waits on storage. Entries beyond the channel capacity are dropped.
    pub fn record_detached(&self, entry: AuditLogEntry) {
        self.logger.log(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLogFilter, AuditStorage, MemoryAuditStorage};
    use backoffice_core::types::{AuditCategory, AuditStatus, Permission, Principal, Resource};
    use chrono::{DateTime, Utc};

    fn ctx() -> RequestContext {
        RequestContext::new("/admin/users/42")
            .with_principal(Principal::new("u-1", "alice@example.com", "ADMIN"))
    }

    fn interceptor() -> (AuditInterceptor, Arc<MemoryAuditStorage>) {
        let storage = Arc::new(MemoryAuditStorage::new());
        let logger = Arc::new(AuditLogger::new(storage.clone(), 16));
        (AuditInterceptor::new(logger), storage)
    }

    #[tokio::test]
    async fn test_detached_writes_are_bounded_by_channel() {
        let storage = Arc::new(MemoryAuditStorage::new());
        let logger = Arc::new(AuditLogger::new(storage.clone(), 4));
        let interceptor = AuditInterceptor::new(logger);
        let op = AuditedOperation::new(AuditAction::DataViewed, "audit_logs");

        // The writer task cannot run before this test yields
        for _ in 0..10 {
            interceptor.record_detached(AuditInterceptor::entry_for(&ctx(), &op, None));
        }

        for _ in 0..50 {
            if storage.len().await >= 4 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(storage.len().await, 4);
    }

    #[tokio::test]
    async fn test_success_recorded_under_operation() {
        let (interceptor, storage) = interceptor();
        let op = AuditedOperation::new(AuditAction::UserUpdated, "user/42")
            .with_details(json!({ "field": "email" }));

        let value = interceptor.run(&ctx(), op, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);

        let entries = storage.query(&AuditLogFilter::new(), None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::UserUpdated);
        assert_eq!(entries[0].status, AuditStatus::Success);
        assert_eq!(entries[0].user_id, "u-1");
        assert_eq!(entries[0].details["field"], "email");
    }

    #[tokio::test]
    async fn test_denial_recorded_under_denial_action() {
        let (interceptor, storage) = interceptor();
        let op = AuditedOperation::new(AuditAction::UserDeleted, "user/42");

        let result: AccessResult<()> = interceptor
            .run(&ctx(), op, async {
                Err(AccessError::PermissionDenied {
                    resource: Resource::Users,
                    permission: Permission::Delete,
                })
            })
            .await;
        assert!(matches!(result, Err(AccessError::PermissionDenied { .. })));

        let entries = storage.query(&AuditLogFilter::new(), None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::PermissionDenied);
        assert_eq!(entries[0].category, AuditCategory::Authorization);
        assert_eq!(entries[0].status, AuditStatus::Failure);
        assert_eq!(entries[0].details["operation"], "USER_DELETED");
    }

    struct BrokenStorage;

    #[async_trait::async_trait]
    impl AuditStorage for BrokenStorage {
        async fn store(&self, _entry: &AuditLogEntry) -> backoffice_core::Result<()> {
            Err(backoffice_core::Error::Config {
                message: "storage offline".to_string(),
            })
        }

        async fn query(
            &self,
            _filter: &AuditLogFilter,
            _window: Option<crate::audit::PageWindow>,
        ) -> backoffice_core::Result<Vec<AuditLogEntry>> {
            Ok(Vec::new())
        }

        async fn count(&self, _filter: &AuditLogFilter) -> backoffice_core::Result<u64> {
            Ok(0)
        }

        async fn statistics(
            &self,
            period: crate::audit::StatisticsPeriod,
            since: DateTime<Utc>,
        ) -> backoffice_core::Result<crate::audit::AuditStatistics> {
            Ok(crate::audit::AuditStatistics::empty(period, since))
        }

        async fn delete_before(&self, _cutoff: DateTime<Utc>) -> backoffice_core::Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_change_result() {
        let logger = Arc::new(AuditLogger::new(Arc::new(BrokenStorage), 16));
        let interceptor = AuditInterceptor::new(logger);
        let op = AuditedOperation::new(AuditAction::DataViewed, "reports");

        let value = interceptor.run(&ctx(), op, async { Ok("ok") }).await.unwrap();
        assert_eq!(value, "ok");
    }

    #[test]
    fn test_rate_limit_failure_mapping() {
        use crate::rate_limit::RateLimitStatus;

        let err = AccessError::RequestTooFrequent {
            status: RateLimitStatus {
                limit: 5,
                remaining: 4,
                count: 1,
                reset_at_ms: 1_700_000_000_000,
                window_ms: 1000,
            },
        };
        match AuditFailure::from_error(&err) {
            AuditFailure::Denied { action, details, .. } => {
                assert_eq!(action, AuditAction::RateLimitExceeded);
                assert_eq!(details["limit"], 5);
            }
            other => panic!("unexpected failure: {other:?}"),
        }

        let failed = AuditFailure::from_error(&AccessError::Validation("bad".into()));
        assert!(matches!(failed, AuditFailure::Failed { .. }));
    }
}
