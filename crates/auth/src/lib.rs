//! Access control for the backoffice
//!
//! Permission resolution, rate limiting, and the audit log pipeline.

pub mod audit;
pub mod audit_export;
pub mod audit_storage_pg;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod permission_store;
pub mod permission_store_pg;
pub mod rate_limit;
pub mod rbac;
pub mod user_agent;

pub use audit::{
    AuditLogEntry, AuditLogFilter, AuditLogger, AuditPage, AuditStatistics, AuditStorage,
    MemoryAuditStorage, StatisticsPeriod,
};
pub use audit_export::ExportFormat;
pub use audit_storage_pg::PostgresAuditStorage;
pub use context::RequestContext;
pub use error::{AccessError, AccessResult};
pub use interceptor::{AuditFailure, AuditInterceptor, AuditedOperation};
pub use permission_store::{MemoryPermissionStore, PermissionStore};
pub use permission_store_pg::PostgresPermissionStore;
pub use rate_limit::{RateLimitStatus, RateLimiter};
pub use rbac::{DefaultRoles, PermissionResolver, UserPermissions};
pub use user_agent::ClientInfo;
