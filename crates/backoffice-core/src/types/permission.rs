//! Resources, permissions and role grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Subjects of access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resource {
    Dashboard,
    Users,
    Roles,
    Settings,
    Wallets,
    Trades,
    SupportTickets,
    AuditLogs,
    Reports,
}

impl Resource {
    pub const ALL: [Resource; 9] = [
        Resource::Dashboard,
        Resource::Users,
        Resource::Roles,
        Resource::Settings,
        Resource::Wallets,
        Resource::Trades,
        Resource::SupportTickets,
        Resource::AuditLogs,
        Resource::Reports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Dashboard => "DASHBOARD",
            Resource::Users => "USERS",
            Resource::Roles => "ROLES",
            Resource::Settings => "SETTINGS",
            Resource::Wallets => "WALLETS",
            Resource::Trades => "TRADES",
            Resource::SupportTickets => "SUPPORT_TICKETS",
            Resource::AuditLogs => "AUDIT_LOGS",
            Resource::Reports => "REPORTS",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidValue {
                field: "resource",
                value: s.to_string(),
            })
    }
}

/// Operations that can be granted on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Create,
    Read,
    Update,
    Delete,
    /// Implies every other permission on the same resource.
    Manage,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::Create,
        Permission::Read,
        Permission::Update,
        Permission::Delete,
        Permission::Manage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Create => "CREATE",
            Permission::Read => "READ",
            Permission::Update => "UPDATE",
            Permission::Delete => "DELETE",
            Permission::Manage => "MANAGE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidValue {
                field: "permission",
                value: s.to_string(),
            })
    }
}

/// Deduplicated set of permissions granted on one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether the set grants `permission`, honouring MANAGE.
    pub fn allows(&self, permission: Permission) -> bool {
        self.0.contains(&Permission::Manage) || self.0.contains(&permission)
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    /// Union another set into this one.
    pub fn merge(&mut self, other: &PermissionSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    /// Permission names in canonical order, as stored in the database.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|p| p.as_str().to_string()).collect()
    }

    /// Parse stored permission names.
    pub fn from_strings<S: AsRef<str>>(values: &[S]) -> Result<Self, Error> {
        values
            .iter()
            .map(|v| v.as_ref().parse::<Permission>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Permission; N]> for PermissionSet {
    fn from(values: [Permission; N]) -> Self {
        values.into_iter().collect()
    }
}

/// The unit of grant: one row per (role, resource).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePermission {
    pub id: Uuid,
    pub role_id: Uuid,
    pub role: String,
    pub resource: Resource,
    pub permissions: PermissionSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RolePermission {
    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.allows(permission)
    }
}

/// Input for creating or merging a grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRolePermission {
    pub role: String,
    pub resource: Resource,
    pub permissions: PermissionSet,
}

impl NewRolePermission {
    pub fn new(role: impl Into<String>, resource: Resource, permissions: impl Into<PermissionSet>) -> Self {
        Self {
            role: role.into(),
            resource,
            permissions: permissions.into(),
        }
    }
}
