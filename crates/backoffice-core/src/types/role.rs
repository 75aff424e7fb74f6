//! Roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Built-in role names.
pub mod names {
    pub const SUPER_ADMIN: &str = "SUPER_ADMIN";
    pub const ADMIN: &str = "ADMIN";
    pub const MANAGER: &str = "MANAGER";
    pub const SUPPORT: &str = "SUPPORT";
    pub const VIEWER: &str = "VIEWER";
}

/// A named, mutable collection of grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// System roles cannot be deleted.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            is_system: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark as system role.
    pub fn as_system_role(mut self) -> Self {
        self.is_system = true;
        self
    }
}
