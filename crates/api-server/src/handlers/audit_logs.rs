//! Audit log query, statistics, export and retention handlers.

use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use backoffice_core::types::{Permission, Resource};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use auth::{
    AuditLogEntry, AuditLogFilter, AuditPage, AuditStatistics, ExportFormat, RequestContext,
    StatisticsPeriod,
};

use crate::error::{ApiError, ApiResult};
use crate::middleware::require_permission;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsQuery {
    #[serde(default)]
    pub period: Option<StatisticsPeriod>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivityQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousActivityQuery {
    #[serde(default)]
    pub window_minutes: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQuery {
    pub retention_days: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub message: String,
    pub deleted_count: u64,
}

const DEFAULT_RECENT_LIMIT: u32 = 20;
const DEFAULT_SUSPICIOUS_WINDOW_MINUTES: i64 = 60;

/// Paged, filtered audit log listing.
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(filter): Query<AuditLogFilter>,
) -> ApiResult<Json<AuditPage>> {
    require_permission(&state, &ctx, Resource::AuditLogs, Permission::Read).await?;

    let page = state.audit_logger.find_by_filters(&filter).await?;
    Ok(Json(page))
}

pub async fn get_statistics(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<StatisticsQuery>,
) -> ApiResult<Json<AuditStatistics>> {
    require_permission(&state, &ctx, Resource::AuditLogs, Permission::Read).await?;

    let stats = state
        .audit_logger
        .get_statistics(query.period.unwrap_or_default())
        .await?;
    Ok(Json(stats))
}

pub async fn get_recent_activity(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(user_id): Path<String>,
    Query(query): Query<RecentActivityQuery>,
) -> ApiResult<Json<Vec<AuditLogEntry>>> {
    require_permission(&state, &ctx, Resource::AuditLogs, Permission::Read).await?;

    let entries = state
        .audit_logger
        .get_recent_activity(&user_id, query.limit.unwrap_or(DEFAULT_RECENT_LIMIT))
        .await?;
    Ok(Json(entries))
}

/// HIGH-severity entries for a user in the trailing window.
pub async fn get_suspicious_activity(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(user_id): Path<String>,
    Query(query): Query<SuspiciousActivityQuery>,
) -> ApiResult<Json<Vec<AuditLogEntry>>> {
    require_permission(&state, &ctx, Resource::AuditLogs, Permission::Read).await?;

    let entries = state
        .audit_logger
        .detect_suspicious_activity(
            &user_id,
            query
                .window_minutes
                .unwrap_or(DEFAULT_SUSPICIOUS_WINDOW_MINUTES),
        )
        .await?;
    Ok(Json(entries))
}

/// Download every matching entry as CSV (default) or JSON.
pub async fn export_audit_logs(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(filter): Query<AuditLogFilter>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    require_permission(&state, &ctx, Resource::AuditLogs, Permission::Read).await?;

    let format = match query.format.as_deref() {
        Some(raw) => raw
            .parse::<ExportFormat>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => ExportFormat::default(),
    };

    let body = state.audit_logger.export_logs(&filter, format).await?;
    let disposition = format!("attachment; filename=\"{}\"", format.file_name(Utc::now()));

    Ok((
        [
            (CONTENT_TYPE, format.content_type().to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Purge entries older than `retentionDays`.
pub async fn cleanup_audit_logs(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<Json<CleanupResponse>> {
    require_permission(&state, &ctx, Resource::AuditLogs, Permission::Delete).await?;

    let deleted = state
        .audit_logger
        .delete_old_logs(query.retention_days)
        .await?;

    Ok(Json(CleanupResponse {
        message: format!(
            "Deleted {} audit log entries older than {} days",
            deleted, query.retention_days
        ),
        deleted_count: deleted,
    }))
}
