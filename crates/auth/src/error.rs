//! Access-control error taxonomy.

use backoffice_core::types::{Permission, Resource};
use thiserror::Error;
use uuid::Uuid;

use crate::rate_limit::RateLimitStatus;

/// Errors raised by the permission resolver, rate limiter and audit pipeline.
///
/// A role/resource pair without a grant is not an error: it resolves to a
/// plain `false` from the boolean checks.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Principal {principal_id} not found")]
    PrincipalNotFound { principal_id: String },

    #[error("Principal {principal_id} is not approved or not active")]
    PrincipalInactive { principal_id: String },

    #[error("Permission denied: {permission} on {resource}")]
    PermissionDenied {
        resource: Resource,
        permission: Permission,
    },

    #[error("Access to menu '{menu_key}' denied")]
    MenuAccessDenied { menu_key: String },

    #[error("Too many requests: rate limit exceeded")]
    RateLimitExceeded { status: RateLimitStatus },

    #[error("Too many requests: too frequent")]
    RequestTooFrequent { status: RateLimitStatus },

    #[error("Audit write failed: {0}")]
    AuditWriteFailed(String),

    #[error("Role {0} not found")]
    RoleNotFound(String),

    #[error("Role {0} already exists")]
    RoleExists(String),

    #[error("System role {0} cannot be deleted")]
    SystemRoleProtected(String),

    #[error("Role permission {0} not found")]
    RolePermissionNotFound(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] backoffice_core::Error),
}

impl AccessError {
    /// Authorization failures: the principal may not proceed.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AccessError::PrincipalNotFound { .. }
                | AccessError::PrincipalInactive { .. }
                | AccessError::PermissionDenied { .. }
                | AccessError::MenuAccessDenied { .. }
        )
    }

    /// Rate-limit rejections, always surfaced as HTTP 429.
    pub fn rate_limit_status(&self) -> Option<&RateLimitStatus> {
        match self {
            AccessError::RateLimitExceeded { status }
            | AccessError::RequestTooFrequent { status } => Some(status),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AccessError {
    fn from(err: sqlx::Error) -> Self {
        AccessError::StoreUnavailable(backoffice_core::Error::Database(err))
    }
}

pub type AccessResult<T> = Result<T, AccessError>;
