//! Role-Based Access Control (RBAC) permission resolver.
//!
//! Each principal holds one role, and each role holds at most one grant per
//! resource. Resolved permissions are cached per principal under
//! `user_permissions:{id}` and every role or grant mutation invalidates them.

use backoffice_core::cache::keys;
use backoffice_core::config::PermissionConfig;
use backoffice_core::types::{
    names, NewRolePermission, Permission, PermissionSet, PrincipalStatus, Resource, Role,
    RolePermission,
};
use backoffice_core::{Cache, CacheExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AccessError, AccessResult};
use crate::permission_store::PermissionStore;

/// Navigation menus and the resource each one requires READ on.
pub const MENU_RESOURCES: &[(&str, Resource)] = &[
    ("dashboard", Resource::Dashboard),
    ("users", Resource::Users),
    ("roles", Resource::Roles),
    ("settings", Resource::Settings),
    ("wallets", Resource::Wallets),
    ("trades", Resource::Trades),
    ("support", Resource::SupportTickets),
    ("audit-logs", Resource::AuditLogs),
    ("reports", Resource::Reports),
];

/// Resource guarding a menu, if the menu exists.
pub fn menu_resource(menu_key: &str) -> Option<Resource> {
    MENU_RESOURCES
        .iter()
        .find(|(key, _)| *key == menu_key)
        .map(|(_, resource)| *resource)
}

/// A principal's role together with that role's grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermissions {
    pub principal_id: String,
    pub role: String,
    pub is_active: bool,
    pub status: PrincipalStatus,
    /// Empty for the super-role, which bypasses grants.
    pub permissions: Vec<RolePermission>,
}

impl UserPermissions {
    pub fn is_eligible(&self) -> bool {
        backoffice_core::types::is_eligible(self.is_active, self.status)
    }

    fn grant_for(&self, resource: Resource) -> Option<&RolePermission> {
        self.permissions.iter().find(|g| g.resource == resource)
    }
}

/// Seed data for the built-in roles.
pub struct DefaultRoles;

impl DefaultRoles {
    pub fn roles() -> Vec<Role> {
        vec![
            Role::new(names::SUPER_ADMIN, "Unrestricted access to every resource").as_system_role(),
            Role::new(names::ADMIN, "Administers users, wallets and support").as_system_role(),
            Role::new(names::MANAGER, "Oversees users, wallets and support queues").as_system_role(),
            Role::new(names::SUPPORT, "Handles customer support tickets").as_system_role(),
            Role::new(names::VIEWER, "Read-only dashboards and reports").as_system_role(),
        ]
    }

    /// The super-role carries no rows; it is resolved before grants.
    pub fn grants() -> Vec<NewRolePermission> {
        use Permission::*;
        use Resource::*;

        vec![
            NewRolePermission::new(names::ADMIN, Dashboard, [Read]),
            NewRolePermission::new(names::ADMIN, Users, [Create, Read, Update, Delete]),
            NewRolePermission::new(names::ADMIN, Roles, [Read]),
            NewRolePermission::new(names::ADMIN, Settings, [Read, Update]),
            NewRolePermission::new(names::ADMIN, Wallets, [Read, Update]),
            NewRolePermission::new(names::ADMIN, Trades, [Read]),
            NewRolePermission::new(names::ADMIN, SupportTickets, [Manage]),
            NewRolePermission::new(names::ADMIN, AuditLogs, [Read]),
            NewRolePermission::new(names::ADMIN, Reports, [Read]),
            NewRolePermission::new(names::MANAGER, Dashboard, [Read]),
            NewRolePermission::new(names::MANAGER, Users, [Read, Update]),
            NewRolePermission::new(names::MANAGER, Wallets, [Read]),
            NewRolePermission::new(names::MANAGER, Trades, [Read]),
            NewRolePermission::new(names::MANAGER, SupportTickets, [Manage]),
            NewRolePermission::new(names::MANAGER, Reports, [Read]),
            NewRolePermission::new(names::MANAGER, AuditLogs, [Read]),
            NewRolePermission::new(names::SUPPORT, Dashboard, [Read]),
            NewRolePermission::new(names::SUPPORT, Users, [Read]),
            NewRolePermission::new(names::SUPPORT, Wallets, [Read]),
            NewRolePermission::new(names::SUPPORT, SupportTickets, [Create, Read, Update]),
            NewRolePermission::new(names::VIEWER, Dashboard, [Read]),
            NewRolePermission::new(names::VIEWER, Reports, [Read]),
        ]
    }
}

/// Resolves principals to capabilities.
pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,
    cache: Arc<dyn Cache>,
    config: PermissionConfig,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<dyn Cache>, config: PermissionConfig) -> Self {
        Self { store, cache, config }
    }

    pub fn super_role(&self) -> &str {
        &self.config.super_role
    }

    /// Role and grants for a principal, cache first.
    pub async fn get_user_permissions(&self, principal_id: &str) -> AccessResult<UserPermissions> {
        let key = keys::user_permissions(principal_id);

        match self.cache.get_json::<UserPermissions>(&key).await {
            Ok(Some(cached)) => {
                debug!(principal_id, "Permission cache hit");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => warn!(principal_id, error = %e, "Permission cache read failed, using store"),
        }

        let principal = self
            .store
            .find_principal(principal_id)
            .await?
            .ok_or_else(|| AccessError::PrincipalNotFound {
                principal_id: principal_id.to_string(),
            })?;

        let permissions = if principal.role == self.config.super_role {
            Vec::new()
        } else {
            self.store.list_role_permissions(&principal.role).await?
        };

        let resolved = UserPermissions {
            principal_id: principal.id,
            role: principal.role,
            is_active: principal.is_active,
            status: principal.status,
            permissions,
        };

        if let Err(e) = self.cache.set_json(&key, &resolved, self.config.cache_ttl()).await {
            warn!(principal_id, error = %e, "Failed to cache permissions");
        }

        Ok(resolved)
    }

    /// Permissions of an eligible principal; denial errors otherwise.
    async fn eligible_permissions(&self, principal_id: &str) -> AccessResult<UserPermissions> {
        let resolved = self.get_user_permissions(principal_id).await?;
        if !resolved.is_eligible() {
            return Err(AccessError::PrincipalInactive {
                principal_id: principal_id.to_string(),
            });
        }
        Ok(resolved)
    }

    fn grants(&self, resolved: &UserPermissions, resource: Resource, permission: Permission) -> bool {
        if resolved.role == self.config.super_role {
            return true;
        }
        resolved
            .grant_for(resource)
            .map(|grant| grant.allows(permission))
            .unwrap_or(false)
    }

    /// Denials become `false`; store failures still propagate.
    async fn evaluate<F>(&self, principal_id: &str, decide: F) -> AccessResult<bool>
    where
        F: FnOnce(&UserPermissions) -> bool,
    {
        match self.eligible_permissions(principal_id).await {
            Ok(resolved) => Ok(decide(&resolved)),
            Err(e) if e.is_denial() => {
                debug!(principal_id, reason = %e, "Principal denied");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn has_permission(
        &self,
        principal_id: &str,
        resource: Resource,
        permission: Permission,
    ) -> AccessResult<bool> {
        self.evaluate(principal_id, |resolved| self.grants(resolved, resource, permission))
            .await
    }

    pub async fn has_any_permission(
        &self,
        principal_id: &str,
        resource: Resource,
        permissions: &[Permission],
    ) -> AccessResult<bool> {
        self.evaluate(principal_id, |resolved| {
            permissions.iter().any(|p| self.grants(resolved, resource, *p))
        })
        .await
    }

    /// Unknown menus are denied.
    pub async fn has_menu_access(&self, principal_id: &str, menu_key: &str) -> AccessResult<bool> {
        let Some(resource) = menu_resource(menu_key) else {
            return Ok(false);
        };
        self.has_permission(principal_id, resource, Permission::Read).await
    }

    pub async fn check_permission(
        &self,
        principal_id: &str,
        resource: Resource,
        permission: Permission,
    ) -> AccessResult<()> {
        let resolved = self.eligible_permissions(principal_id).await?;
        if self.grants(&resolved, resource, permission) {
            Ok(())
        } else {
            Err(AccessError::PermissionDenied { resource, permission })
        }
    }

    /// Denials name the first requested permission.
    pub async fn check_any_permission(
        &self,
        principal_id: &str,
        resource: Resource,
        permissions: &[Permission],
    ) -> AccessResult<()> {
        let Some(first) = permissions.first().copied() else {
            return Err(AccessError::Validation("at least one permission is required".to_string()));
        };

        let resolved = self.eligible_permissions(principal_id).await?;
        if permissions.iter().any(|p| self.grants(&resolved, resource, *p)) {
            Ok(())
        } else {
            Err(AccessError::PermissionDenied {
                resource,
                permission: first,
            })
        }
    }

    pub async fn check_menu_access(&self, principal_id: &str, menu_key: &str) -> AccessResult<()> {
        let denied = || AccessError::MenuAccessDenied {
            menu_key: menu_key.to_string(),
        };

        let resource = menu_resource(menu_key).ok_or_else(denied)?;
        let resolved = self.eligible_permissions(principal_id).await?;
        if self.grants(&resolved, resource, Permission::Read) {
            Ok(())
        } else {
            Err(denied())
        }
    }

    /// Grant permissions on a resource, merging into an existing grant.
    pub async fn create_role_permission(&self, grant: NewRolePermission) -> AccessResult<RolePermission> {
        if grant.permissions.is_empty() {
            return Err(AccessError::Validation("permissions must not be empty".to_string()));
        }

        let saved = self.store.upsert_role_permission(&grant).await?;
        info!(
            role = %saved.role,
            resource = %saved.resource,
            permissions = ?saved.permissions.to_strings(),
            "Role permission saved"
        );
        self.invalidate_all().await;
        Ok(saved)
    }

    /// Replace the permission set of an existing grant.
    pub async fn update_role_permission(
        &self,
        id: Uuid,
        permissions: PermissionSet,
    ) -> AccessResult<RolePermission> {
        if permissions.is_empty() {
            return Err(AccessError::Validation("permissions must not be empty".to_string()));
        }

        let updated = self
            .store
            .replace_permissions(id, &permissions)
            .await?
            .ok_or(AccessError::RolePermissionNotFound(id))?;

        info!(role = %updated.role, resource = %updated.resource, "Role permission updated");
        self.invalidate_all().await;
        Ok(updated)
    }

    pub async fn delete_role_permission(&self, id: Uuid) -> AccessResult<()> {
        if !self.store.delete_role_permission(id).await? {
            return Err(AccessError::RolePermissionNotFound(id));
        }

        info!(id = %id, "Role permission deleted");
        self.invalidate_all().await;
        Ok(())
    }

    pub async fn get_role_permissions(&self, role: &str) -> AccessResult<Vec<RolePermission>> {
        self.store.list_role_permissions(role).await
    }

    pub async fn get_all_role_permissions(&self) -> AccessResult<Vec<RolePermission>> {
        self.store.list_all_role_permissions().await
    }

    /// Seed built-in roles and grants into an empty store.
    ///
    /// Returns the number of grants written; zero when any grant already exists.
    pub async fn initialize_default_permissions(&self) -> AccessResult<usize> {
        let existing = self.store.count_role_permissions().await?;
        if existing > 0 {
            debug!(existing, "Role permissions already present, skipping seed");
            return Ok(0);
        }

        for role in DefaultRoles::roles() {
            if self.store.find_role(&role.name).await?.is_none() {
                self.store.insert_role(&role).await?;
            }
        }

        let grants = DefaultRoles::grants();
        for grant in &grants {
            self.store.upsert_role_permission(grant).await?;
        }

        info!(grants = grants.len(), "Default role permissions initialized");
        self.invalidate_all().await;
        Ok(grants.len())
    }

    pub async fn create_role(&self, name: &str, description: &str) -> AccessResult<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AccessError::Validation("role name must not be empty".to_string()));
        }

        let role = Role::new(name, description);
        self.store.insert_role(&role).await?;
        info!(role = %role.name, "Role created");
        self.invalidate_all().await;
        Ok(role)
    }

    /// All roles, cached under `all_roles`.
    pub async fn list_roles(&self) -> AccessResult<Vec<Role>> {
        match self.cache.get_json::<Vec<Role>>(keys::ALL_ROLES).await {
            Ok(Some(roles)) => return Ok(roles),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Role cache read failed, using store"),
        }

        let roles = self.store.list_roles().await?;
        if let Err(e) = self
            .cache
            .set_json(keys::ALL_ROLES, &roles, self.config.cache_ttl())
            .await
        {
            warn!(error = %e, "Failed to cache roles");
        }
        Ok(roles)
    }

    pub async fn delete_role(&self, name: &str) -> AccessResult<()> {
        let role = self
            .store
            .find_role(name)
            .await?
            .ok_or_else(|| AccessError::RoleNotFound(name.to_string()))?;

        if role.is_system {
            return Err(AccessError::SystemRoleProtected(role.name));
        }

        self.store.delete_role(name).await?;
        info!(role = %name, "Role deleted");
        self.invalidate_all().await;
        Ok(())
    }

    /// Drop one principal's cached permissions.
    pub async fn invalidate_principal(&self, principal_id: &str) {
        if let Err(e) = self.cache.delete(&keys::user_permissions(principal_id)).await {
            warn!(principal_id, error = %e, "Failed to invalidate principal permissions");
        }
    }

    async fn invalidate_all(&self) {
        match self.cache.delete_prefix(keys::USER_PERMISSIONS_PREFIX).await {
            Ok(removed) => debug!(removed, "Invalidated cached user permissions"),
            Err(e) => warn!(error = %e, "Failed to invalidate cached user permissions"),
        }
        if let Err(e) = self.cache.delete(keys::ALL_ROLES).await {
            warn!(error = %e, "Failed to invalidate cached roles");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission_store::{MemoryPermissionStore, MockPermissionStore};
    use backoffice_core::types::Principal;
    use backoffice_core::MemoryCache;
    use chrono::Utc;

    async fn seeded() -> (PermissionResolver, Arc<MemoryPermissionStore>) {
        let store = Arc::new(MemoryPermissionStore::new());
        let resolver = PermissionResolver::new(
            store.clone(),
            Arc::new(MemoryCache::new()),
            PermissionConfig::default(),
        );
        resolver.initialize_default_permissions().await.unwrap();
        (resolver, store)
    }

    fn grant(role: &str, resource: Resource, permissions: PermissionSet) -> RolePermission {
        let now = Utc::now();
        RolePermission {
            id: Uuid::new_v4(),
            role_id: Uuid::new_v4(),
            role: role.to_string(),
            resource,
            permissions,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_default_deny() {
        let (resolver, store) = seeded().await;
        store
            .insert_principal(Principal::new("viewer-1", "v@example.com", names::VIEWER))
            .await;

        assert!(resolver
            .has_permission("viewer-1", Resource::Reports, Permission::Read)
            .await
            .unwrap());
        // VIEWER has no WALLETS row at all
        assert!(!resolver
            .has_permission("viewer-1", Resource::Wallets, Permission::Read)
            .await
            .unwrap());
        assert!(matches!(
            resolver
                .check_permission("viewer-1", Resource::Wallets, Permission::Read)
                .await,
            Err(AccessError::PermissionDenied {
                resource: Resource::Wallets,
                permission: Permission::Read
            })
        ));
    }

    #[tokio::test]
    async fn test_manage_subsumes_everything() {
        let (resolver, store) = seeded().await;
        store
            .insert_principal(Principal::new("admin-1", "a@example.com", names::ADMIN))
            .await;

        for permission in Permission::ALL {
            assert!(resolver
                .has_permission("admin-1", Resource::SupportTickets, permission)
                .await
                .unwrap());
        }
    }

    #[tokio::test]
    async fn test_ineligible_principal_denied_everything() {
        let (resolver, store) = seeded().await;
        store
            .insert_principal(
                Principal::new("pending-1", "p@example.com", names::SUPER_ADMIN)
                    .with_status(PrincipalStatus::Pending),
            )
            .await;
        store
            .insert_principal(Principal::new("off-1", "o@example.com", names::ADMIN).deactivated())
            .await;

        assert!(!resolver
            .has_permission("pending-1", Resource::Dashboard, Permission::Read)
            .await
            .unwrap());
        assert!(!resolver.has_menu_access("off-1", "dashboard").await.unwrap());
        assert!(matches!(
            resolver
                .check_permission("off-1", Resource::Dashboard, Permission::Read)
                .await,
            Err(AccessError::PrincipalInactive { .. })
        ));
    }

    #[tokio::test]
    async fn test_super_role_bypasses_grants() {
        let (resolver, store) = seeded().await;
        store
            .insert_principal(Principal::new("root", "r@example.com", names::SUPER_ADMIN))
            .await;

        assert!(resolver
            .has_permission("root", Resource::Roles, Permission::Delete)
            .await
            .unwrap());
        assert!(resolver.get_user_permissions("root").await.unwrap().permissions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_principal() {
        let (resolver, _) = seeded().await;

        assert!(!resolver
            .has_permission("ghost", Resource::Dashboard, Permission::Read)
            .await
            .unwrap());
        assert!(matches!(
            resolver.get_user_permissions("ghost").await,
            Err(AccessError::PrincipalNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_permissions_cached_between_checks() {
        let mut store = MockPermissionStore::new();
        store
            .expect_find_principal()
            .times(1)
            .returning(|_| Ok(Some(Principal::new("u-1", "u@example.com", names::ADMIN))));
        store.expect_list_role_permissions().times(1).returning(|_| {
            Ok(vec![grant(
                names::ADMIN,
                Resource::Users,
                PermissionSet::from([Permission::Read, Permission::Update]),
            )])
        });

        let resolver = PermissionResolver::new(
            Arc::new(store),
            Arc::new(MemoryCache::new()),
            PermissionConfig::default(),
        );

        assert!(resolver
            .has_permission("u-1", Resource::Users, Permission::Read)
            .await
            .unwrap());
        assert!(!resolver
            .has_permission("u-1", Resource::Users, Permission::Delete)
            .await
            .unwrap());
        assert!(resolver
            .has_any_permission("u-1", Resource::Users, &[Permission::Delete, Permission::Update])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_mutation_invalidates_cache() {
        let (resolver, store) = seeded().await;
        store
            .insert_principal(Principal::new("viewer-1", "v@example.com", names::VIEWER))
            .await;

        assert!(!resolver
            .has_permission("viewer-1", Resource::Trades, Permission::Read)
            .await
            .unwrap());

        resolver
            .create_role_permission(NewRolePermission::new(names::VIEWER, Resource::Trades, [Permission::Read]))
            .await
            .unwrap();

        assert!(resolver
            .has_permission("viewer-1", Resource::Trades, Permission::Read)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_principal_picks_up_status_change() {
        let (resolver, store) = seeded().await;
        store
            .insert_principal(Principal::new("s-1", "s@example.com", names::SUPPORT))
            .await;
        assert!(resolver.has_menu_access("s-1", "support").await.unwrap());

        store
            .insert_principal(
                Principal::new("s-1", "s@example.com", names::SUPPORT).with_status(PrincipalStatus::Suspended),
            )
            .await;
        // still served from cache
        assert!(resolver.has_menu_access("s-1", "support").await.unwrap());

        resolver.invalidate_principal("s-1").await;
        assert!(!resolver.has_menu_access("s-1", "support").await.unwrap());
    }

    #[tokio::test]
    async fn test_menu_access() {
        let (resolver, store) = seeded().await;
        store
            .insert_principal(Principal::new("m-1", "m@example.com", names::MANAGER))
            .await;

        assert!(resolver.has_menu_access("m-1", "audit-logs").await.unwrap());
        assert!(!resolver.has_menu_access("m-1", "settings").await.unwrap());
        assert!(!resolver.has_menu_access("m-1", "no-such-menu").await.unwrap());
        assert!(matches!(
            resolver.check_menu_access("m-1", "roles").await,
            Err(AccessError::MenuAccessDenied { menu_key }) if menu_key == "roles"
        ));
    }

    #[tokio::test]
    async fn test_check_any_permission() {
        let (resolver, store) = seeded().await;
        store
            .insert_principal(Principal::new("s-1", "s@example.com", names::SUPPORT))
            .await;

        resolver
            .check_any_permission("s-1", Resource::Users, &[Permission::Delete, Permission::Read])
            .await
            .unwrap();

        assert!(matches!(
            resolver
                .check_any_permission("s-1", Resource::Users, &[Permission::Delete, Permission::Create])
                .await,
            Err(AccessError::PermissionDenied {
                permission: Permission::Delete,
                ..
            })
        ));
        assert!(matches!(
            resolver.check_any_permission("s-1", Resource::Users, &[]).await,
            Err(AccessError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (resolver, _) = seeded().await;
        assert_eq!(resolver.initialize_default_permissions().await.unwrap(), 0);
        assert_eq!(
            resolver.get_all_role_permissions().await.unwrap().len(),
            DefaultRoles::grants().len()
        );
    }

    #[tokio::test]
    async fn test_role_lifecycle() {
        let (resolver, _) = seeded().await;

        resolver.create_role("AUDITOR", "Reads audit logs").await.unwrap();
        assert!(resolver
            .list_roles()
            .await
            .unwrap()
            .iter()
            .any(|r| r.name == "AUDITOR"));

        resolver
            .create_role_permission(NewRolePermission::new("AUDITOR", Resource::AuditLogs, [Permission::Read]))
            .await
            .unwrap();
        resolver.delete_role("AUDITOR").await.unwrap();

        assert!(resolver.get_role_permissions("AUDITOR").await.unwrap().is_empty());
        assert!(!resolver
            .list_roles()
            .await
            .unwrap()
            .iter()
            .any(|r| r.name == "AUDITOR"));

        assert!(matches!(
            resolver.delete_role(names::ADMIN).await,
            Err(AccessError::SystemRoleProtected(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_grant() {
        let (resolver, _) = seeded().await;
        let grant = resolver
            .get_role_permissions(names::VIEWER)
            .await
            .unwrap()
            .into_iter()
            .find(|g| g.resource == Resource::Reports)
            .unwrap();

        assert!(matches!(
            resolver
                .update_role_permission(grant.id, PermissionSet::default())
                .await,
            Err(AccessError::Validation(_))
        ));
        let unchanged = resolver.get_role_permissions(names::VIEWER).await.unwrap();
        assert!(unchanged
            .iter()
            .any(|g| g.id == grant.id && g.allows(Permission::Read)));

        let updated = resolver
            .update_role_permission(grant.id, PermissionSet::from([Permission::Manage]))
            .await
            .unwrap();
        assert!(updated.allows(Permission::Delete));

        resolver.delete_role_permission(grant.id).await.unwrap();
        assert!(matches!(
            resolver.delete_role_permission(grant.id).await,
            Err(AccessError::RolePermissionNotFound(_))
        ));
    }
}
