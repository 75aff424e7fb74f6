//! Durable role → (resource, permission set) mapping.

use async_trait::async_trait;
use backoffice_core::types::{
    NewRolePermission, PermissionSet, Principal, Role, RolePermission,
};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AccessError, AccessResult};

/// Storage backend for roles, grants and principal lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Look up a principal supplied by the authentication layer.
    async fn find_principal(&self, principal_id: &str) -> AccessResult<Option<Principal>>;

    async fn find_role(&self, name: &str) -> AccessResult<Option<Role>>;

    async fn list_roles(&self) -> AccessResult<Vec<Role>>;

    /// Insert a role; fails with `RoleExists` on a duplicate name.
    async fn insert_role(&self, role: &Role) -> AccessResult<()>;

    /// Delete a role and its grants. Returns whether the role existed.
    async fn delete_role(&self, name: &str) -> AccessResult<bool>;

    async fn list_role_permissions(&self, role: &str) -> AccessResult<Vec<RolePermission>>;

    async fn list_all_role_permissions(&self) -> AccessResult<Vec<RolePermission>>;

    /// Create the (role, resource) grant, or merge the permissions into the
    /// existing row. Fails with `RoleNotFound` for an unknown role.
    async fn upsert_role_permission(&self, grant: &NewRolePermission) -> AccessResult<RolePermission>;

    /// Replace a grant's permission set.
    async fn replace_permissions(
        &self,
        id: Uuid,
        permissions: &PermissionSet,
    ) -> AccessResult<Option<RolePermission>>;

    async fn delete_role_permission(&self, id: Uuid) -> AccessResult<bool>;

    async fn count_role_permissions(&self) -> AccessResult<u64>;
}

#[derive(Default)]
struct MemoryState {
    principals: HashMap<String, Principal>,
    roles: HashMap<String, Role>,
    grants: HashMap<Uuid, RolePermission>,
}

/// In-memory permission store for testing and development.
#[derive(Default)]
pub struct MemoryPermissionStore {
    state: RwLock<MemoryState>,
}

impl MemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a principal.
    pub async fn insert_principal(&self, principal: Principal) {
        let mut state = self.state.write().await;
        state.principals.insert(principal.id.clone(), principal);
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn find_principal(&self, principal_id: &str) -> AccessResult<Option<Principal>> {
        let state = self.state.read().await;
        Ok(state.principals.get(principal_id).cloned())
    }

    async fn find_role(&self, name: &str) -> AccessResult<Option<Role>> {
        let state = self.state.read().await;
        Ok(state.roles.get(name).cloned())
    }

    async fn list_roles(&self) -> AccessResult<Vec<Role>> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn insert_role(&self, role: &Role) -> AccessResult<()> {
        let mut state = self.state.write().await;
        if state.roles.contains_key(&role.name) {
            return Err(AccessError::RoleExists(role.name.clone()));
        }
        state.roles.insert(role.name.clone(), role.clone());
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> AccessResult<bool> {
        let mut state = self.state.write().await;
        let existed = state.roles.remove(name).is_some();
        state.grants.retain(|_, grant| grant.role != name);
        Ok(existed)
    }

    async fn list_role_permissions(&self, role: &str) -> AccessResult<Vec<RolePermission>> {
        let state = self.state.read().await;
        let mut grants: Vec<RolePermission> = state
            .grants
            .values()
            .filter(|g| g.role == role)
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.resource);
        Ok(grants)
    }

    async fn list_all_role_permissions(&self) -> AccessResult<Vec<RolePermission>> {
        let state = self.state.read().await;
        let mut grants: Vec<RolePermission> = state.grants.values().cloned().collect();
        grants.sort_by(|a, b| a.role.cmp(&b.role).then(a.resource.cmp(&b.resource)));
        Ok(grants)
    }

    async fn upsert_role_permission(&self, grant: &NewRolePermission) -> AccessResult<RolePermission> {
        let mut state = self.state.write().await;
        let role_id = state
            .roles
            .get(&grant.role)
            .map(|r| r.id)
            .ok_or_else(|| AccessError::RoleNotFound(grant.role.clone()))?;

        let now = Utc::now();
        if let Some(existing) = state
            .grants
            .values_mut()
            .find(|g| g.role == grant.role && g.resource == grant.resource)
        {
            existing.permissions.merge(&grant.permissions);
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let created = RolePermission {
            id: Uuid::new_v4(),
            role_id,
            role: grant.role.clone(),
            resource: grant.resource,
            permissions: grant.permissions.clone(),
            created_at: now,
            updated_at: now,
        };
        state.grants.insert(created.id, created.clone());
        Ok(created)
    }

    async fn replace_permissions(
        &self,
        id: Uuid,
        permissions: &PermissionSet,
    ) -> AccessResult<Option<RolePermission>> {
        let mut state = self.state.write().await;
        Ok(state.grants.get_mut(&id).map(|grant| {
            grant.permissions = permissions.clone();
            grant.updated_at = Utc::now();
            grant.clone()
        }))
    }

    async fn delete_role_permission(&self, id: Uuid) -> AccessResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.grants.remove(&id).is_some())
    }

    async fn count_role_permissions(&self) -> AccessResult<u64> {
        let state = self.state.read().await;
        Ok(state.grants.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_core::types::{Permission, Resource};

    async fn store_with_role(name: &str) -> MemoryPermissionStore {
        let store = MemoryPermissionStore::new();
        store.insert_role(&Role::new(name, "test role")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_upsert_merges_same_pair() {
        let store = store_with_role("ADMIN").await;

        let first = store
            .upsert_role_permission(&NewRolePermission::new("ADMIN", Resource::Users, [Permission::Read]))
            .await
            .unwrap();
        let second = store
            .upsert_role_permission(&NewRolePermission::new(
                "ADMIN",
                Resource::Users,
                [Permission::Read, Permission::Update],
            ))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.count_role_permissions().await.unwrap(), 1);
        assert!(second.permissions.contains(Permission::Update));
        assert_eq!(second.permissions.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_unknown_role() {
        let store = MemoryPermissionStore::new();
        let result = store
            .upsert_role_permission(&NewRolePermission::new("GHOST", Resource::Users, [Permission::Read]))
            .await;
        assert!(matches!(result, Err(AccessError::RoleNotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_role_rejected() {
        let store = store_with_role("ADMIN").await;
        let result = store.insert_role(&Role::new("ADMIN", "again")).await;
        assert!(matches!(result, Err(AccessError::RoleExists(_))));
    }

    #[tokio::test]
    async fn test_delete_role_cascades_grants() {
        let store = store_with_role("SUPPORT").await;
        store
            .upsert_role_permission(&NewRolePermission::new("SUPPORT", Resource::SupportTickets, [Permission::Manage]))
            .await
            .unwrap();

        assert!(store.delete_role("SUPPORT").await.unwrap());
        assert_eq!(store.count_role_permissions().await.unwrap(), 0);
        assert!(!store.delete_role("SUPPORT").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_permissions() {
        let store = store_with_role("VIEWER").await;
        let grant = store
            .upsert_role_permission(&NewRolePermission::new("VIEWER", Resource::Reports, [Permission::Read]))
            .await
            .unwrap();

        let replaced = store
            .replace_permissions(grant.id, &PermissionSet::from([Permission::Create]))
            .await
            .unwrap()
            .unwrap();
        assert!(!replaced.permissions.contains(Permission::Read));
        assert!(replaced.permissions.contains(Permission::Create));

        assert!(store
            .replace_permissions(Uuid::new_v4(), &PermissionSet::new())
            .await
            .unwrap()
            .is_none());
    }
}
