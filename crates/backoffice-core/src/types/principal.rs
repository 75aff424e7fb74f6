//! Authenticated principals supplied by the upstream authenticator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Account review state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Suspended,
}

impl PrincipalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalStatus::Pending => "PENDING",
            PrincipalStatus::Approved => "APPROVED",
            PrincipalStatus::Rejected => "REJECTED",
            PrincipalStatus::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for PrincipalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PrincipalStatus::Pending),
            "APPROVED" => Ok(PrincipalStatus::Approved),
            "REJECTED" => Ok(PrincipalStatus::Rejected),
            "SUSPENDED" => Ok(PrincipalStatus::Suspended),
            _ => Err(Error::InvalidValue {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// An authenticated admin user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Role name.
    pub role: String,
    pub is_active: bool,
    pub status: PrincipalStatus,
}

impl Principal {
    /// Create an approved, active principal.
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: None,
            role: role.into(),
            is_active: true,
            status: PrincipalStatus::Approved,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: PrincipalStatus) -> Self {
        self.status = status;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Only approved and active principals may be authorized for anything.
    pub fn is_eligible(&self) -> bool {
        is_eligible(self.is_active, self.status)
    }
}

pub fn is_eligible(is_active: bool, status: PrincipalStatus) -> bool {
    is_active && status == PrincipalStatus::Approved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligibility() {
        let principal = Principal::new("u1", "a@example.com", "ADMIN");
        assert!(principal.is_eligible());
        assert!(!principal.clone().deactivated().is_eligible());

        for status in [
            PrincipalStatus::Pending,
            PrincipalStatus::Rejected,
            PrincipalStatus::Suspended,
        ] {
            assert!(!principal.clone().with_status(status).is_eligible());
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("approved".parse::<PrincipalStatus>().unwrap(), PrincipalStatus::Approved);
        assert!("deleted".parse::<PrincipalStatus>().is_err());
    }
}
