//! Health check handlers.

use axum::extract::State;
use axum::Json;
use backoffice_core::Cache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
    /// Database connection status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Cache connection status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
}

/// Liveness: the process is up.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        database: None,
        cache: None,
    })
}

/// Readiness check endpoint (includes database and cache checks).
pub async fn readiness(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let db_status = match &state.pool {
        Some(pool) => match sqlx::query("SELECT 1").fetch_one(pool).await {
            Ok(_) => "connected".to_string(),
            Err(e) => format!("error: {}", e),
        },
        None => "in-memory".to_string(),
    };

    let cache_status = match state.cache.get("health:ping").await {
        Ok(_) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if db_status.starts_with("error") || cache_status.starts_with("error") {
        "degraded"
    } else {
        "ready"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        database: Some(db_status),
        cache: Some(cache_status),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_core::config::Config;

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_readiness_in_memory() {
        let state = Arc::new(AppState::in_memory(Config::test_config()));
        let Json(response) = readiness(State(state)).await.unwrap();
        assert_eq!(response.status, "ready");
        assert_eq!(response.database.as_deref(), Some("in-memory"));
    }
}
