//! PostgreSQL storage backend for roles and grants.

use async_trait::async_trait;
use backoffice_core::types::{
    NewRolePermission, PermissionSet, Principal, PrincipalStatus, Resource, Role, RolePermission,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AccessError, AccessResult};
use crate::permission_store::PermissionStore;

/// PostgreSQL-backed permission store.
pub struct PostgresPermissionStore {
    pool: PgPool,
}

impl PostgresPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PrincipalRow {
    id: String,
    email: String,
    name: Option<String>,
    role: String,
    is_active: bool,
    status: String,
}

impl PrincipalRow {
    fn into_principal(self) -> AccessResult<Principal> {
        Ok(Principal {
            id: self.id,
            email: self.email,
            name: self.name,
            role: self.role,
            is_active: self.is_active,
            status: self.status.parse::<PrincipalStatus>()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: String,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: row.id,
            name: row.name,
            description: row.description,
            is_system: row.is_system,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    id: Uuid,
    role_id: Uuid,
    role_name: String,
    resource: String,
    permissions: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GrantRow {
    fn into_grant(self) -> AccessResult<RolePermission> {
        Ok(RolePermission {
            id: self.id,
            role_id: self.role_id,
            role: self.role_name,
            resource: self.resource.parse::<Resource>()?,
            permissions: PermissionSet::from_strings(&self.permissions)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const GRANT_SELECT: &str = r#"
    SELECT rp.id, rp.role_id, r.name AS role_name, rp.resource, rp.permissions,
           rp.created_at, rp.updated_at
    FROM role_permissions rp
    JOIN roles r ON r.id = rp.role_id
"#;

fn into_grants(rows: Vec<GrantRow>) -> AccessResult<Vec<RolePermission>> {
    rows.into_iter().map(GrantRow::into_grant).collect()
}

#[async_trait]
impl PermissionStore for PostgresPermissionStore {
    async fn find_principal(&self, principal_id: &str) -> AccessResult<Option<Principal>> {
        let row: Option<PrincipalRow> = sqlx::query_as(
            r#"
            SELECT id, email, name, role, is_active, status
            FROM principals
            WHERE id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PrincipalRow::into_principal).transpose()
    }

    async fn find_role(&self, name: &str) -> AccessResult<Option<Role>> {
        let row: Option<RoleRow> = sqlx::query_as(
            "SELECT id, name, description, is_system, created_at, updated_at FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Role::from))
    }

    async fn list_roles(&self) -> AccessResult<Vec<Role>> {
        let rows: Vec<RoleRow> = sqlx::query_as(
            "SELECT id, name, description, is_system, created_at, updated_at FROM roles ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn insert_role(&self, role: &Role) -> AccessResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO roles (id, name, description, is_system, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(AccessError::RoleExists(role.name.clone()));
        }
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> AccessResult<bool> {
        // role_permissions rows go with it via ON DELETE CASCADE
        let deleted = sqlx::query("DELETE FROM roles WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }

    async fn list_role_permissions(&self, role: &str) -> AccessResult<Vec<RolePermission>> {
        let query = format!("{GRANT_SELECT} WHERE r.name = $1 ORDER BY rp.resource");
        let rows: Vec<GrantRow> = sqlx::query_as(&query)
            .bind(role)
            .fetch_all(&self.pool)
            .await?;

        into_grants(rows)
    }

    async fn list_all_role_permissions(&self) -> AccessResult<Vec<RolePermission>> {
        let query = format!("{GRANT_SELECT} ORDER BY r.name, rp.resource");
        let rows: Vec<GrantRow> = sqlx::query_as(&query).fetch_all(&self.pool).await?;

        into_grants(rows)
    }

    async fn upsert_role_permission(&self, grant: &NewRolePermission) -> AccessResult<RolePermission> {
        let role = self
            .find_role(&grant.role)
            .await?
            .ok_or_else(|| AccessError::RoleNotFound(grant.role.clone()))?;

        // One statement so concurrent grants on the same pair merge instead of
        // racing to insert duplicate rows.
        let row: GrantRow = sqlx::query_as(
            r#"
            WITH upserted AS (
                INSERT INTO role_permissions (id, role_id, resource, permissions, created_at, updated_at)
                VALUES ($1, $2, $3, $4, NOW(), NOW())
                ON CONFLICT (role_id, resource) DO UPDATE SET
                    permissions = ARRAY(
                        SELECT DISTINCT p
                        FROM unnest(role_permissions.permissions || EXCLUDED.permissions) AS p
                        ORDER BY p
                    ),
                    updated_at = NOW()
                RETURNING id, role_id, resource, permissions, created_at, updated_at
            )
            SELECT u.id, u.role_id, $5::text AS role_name, u.resource, u.permissions,
                   u.created_at, u.updated_at
            FROM upserted u
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(role.id)
        .bind(grant.resource.as_str())
        .bind(grant.permissions.to_strings())
        .bind(&role.name)
        .fetch_one(&self.pool)
        .await?;

        row.into_grant()
    }

    async fn replace_permissions(
        &self,
        id: Uuid,
        permissions: &PermissionSet,
    ) -> AccessResult<Option<RolePermission>> {
        let row: Option<GrantRow> = sqlx::query_as(
            r#"
            WITH updated AS (
                UPDATE role_permissions SET permissions = $2, updated_at = NOW()
                WHERE id = $1
                RETURNING id, role_id, resource, permissions, created_at, updated_at
            )
            SELECT u.id, u.role_id, r.name AS role_name, u.resource, u.permissions,
                   u.created_at, u.updated_at
            FROM updated u
            JOIN roles r ON r.id = u.role_id
            "#,
        )
        .bind(id)
        .bind(permissions.to_strings())
        .fetch_optional(&self.pool)
        .await?;

        row.map(GrantRow::into_grant).transpose()
    }

    async fn delete_role_permission(&self, id: Uuid) -> AccessResult<bool> {
        let deleted = sqlx::query("DELETE FROM role_permissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }

    async fn count_role_permissions(&self) -> AccessResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM role_permissions")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}
