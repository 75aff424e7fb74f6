//! What the calling principal may do.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use backoffice_core::types::{Permission, Resource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use auth::{RequestContext, UserPermissions};

use crate::error::ApiResult;
use crate::middleware::principal_id;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PermissionCheckQuery {
    pub resource: Resource,
    pub permission: Permission,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionCheckResponse {
    pub resource: Resource,
    pub permission: Permission,
    pub allowed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuAccessResponse {
    pub menu_key: String,
    pub allowed: bool,
}

pub async fn my_permissions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<UserPermissions>> {
    let principal_id = principal_id(&ctx)?;
    Ok(Json(state.resolver.get_user_permissions(principal_id).await?))
}

pub async fn check_permission(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<PermissionCheckQuery>,
) -> ApiResult<Json<PermissionCheckResponse>> {
    let principal_id = principal_id(&ctx)?;
    let allowed = state
        .resolver
        .has_permission(principal_id, query.resource, query.permission)
        .await?;

    Ok(Json(PermissionCheckResponse {
        resource: query.resource,
        permission: query.permission,
        allowed,
    }))
}

pub async fn check_menu(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(menu_key): Path<String>,
) -> ApiResult<Json<MenuAccessResponse>> {
    let principal_id = principal_id(&ctx)?;
    let allowed = state.resolver.has_menu_access(principal_id, &menu_key).await?;

    Ok(Json(MenuAccessResponse { menu_key, allowed }))
}
