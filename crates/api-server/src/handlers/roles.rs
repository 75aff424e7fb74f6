//! Role and role-permission administration handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use backoffice_core::types::{NewRolePermission, Permission, PermissionSet, Resource, Role, RolePermission};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use auth::RequestContext;

use crate::error::ApiResult;
use crate::middleware::require_permission;
use crate::state::AppState;

/// Create role request.
#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Replace a grant's permission set.
#[derive(Debug, Deserialize)]
pub struct UpdateRolePermissionRequest {
    pub permissions: PermissionSet,
}

/// Seeding outcome.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub created: usize,
}

pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<Vec<Role>>> {
    require_permission(&state, &ctx, Resource::Roles, Permission::Read).await?;
    Ok(Json(state.resolver.list_roles().await?))
}

pub async fn create_role(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Role>)> {
    require_permission(&state, &ctx, Resource::Roles, Permission::Create).await?;
    let Json(req) = payload?;

    let role = state.resolver.create_role(&req.name, &req.description).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    require_permission(&state, &ctx, Resource::Roles, Permission::Delete).await?;

    state.resolver.delete_role(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_role_permissions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<RolePermission>>> {
    require_permission(&state, &ctx, Resource::Roles, Permission::Read).await?;
    Ok(Json(state.resolver.get_role_permissions(&name).await?))
}

pub async fn list_role_permissions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<Vec<RolePermission>>> {
    require_permission(&state, &ctx, Resource::Roles, Permission::Read).await?;
    Ok(Json(state.resolver.get_all_role_permissions().await?))
}

/// Grant permissions, merging into any existing grant for the pair.
pub async fn create_role_permission(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<NewRolePermission>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RolePermission>)> {
    require_permission(&state, &ctx, Resource::Roles, Permission::Create).await?;
    let Json(grant) = payload?;

    let saved = state.resolver.create_role_permission(grant).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn update_role_permission(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateRolePermissionRequest>, JsonRejection>,
) -> ApiResult<Json<RolePermission>> {
    require_permission(&state, &ctx, Resource::Roles, Permission::Update).await?;
    let Json(req) = payload?;

    let updated = state
        .resolver
        .update_role_permission(id, req.permissions)
        .await?;
    Ok(Json(updated))
}

pub async fn delete_role_permission(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state, &ctx, Resource::Roles, Permission::Delete).await?;

    state.resolver.delete_role_permission(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Seed the built-in roles and grants when none exist.
pub async fn initialize_defaults(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<InitializeResponse>> {
    require_permission(&state, &ctx, Resource::Roles, Permission::Manage).await?;

    let created = state.resolver.initialize_default_permissions().await?;
    Ok(Json(InitializeResponse { created }))
}
