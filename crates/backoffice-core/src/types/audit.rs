//! Audit trail vocabulary: actions, outcomes, severities and categories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Outcome recorded for an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Groups of related actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    Authentication,
    Authorization,
    UserManagement,
    RoleManagement,
    WalletManagement,
    CustomerSupport,
    SystemConfiguration,
    DataAccess,
    Security,
}

/// Auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    // Authentication
    Login,
    Logout,
    LoginFailed,
    PasswordChanged,
    PasswordReset,

    // Authorization
    PermissionDenied,
    MenuAccessDenied,

    // Security
    RateLimitExceeded,
    SuspiciousActivity,

    // User management
    UserCreated,
    UserUpdated,
    UserDeleted,
    UserApproved,
    UserRejected,
    UserSuspended,
    UserViewed,

    // Role management
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    PermissionGranted,
    PermissionUpdated,
    PermissionRevoked,

    // Wallets
    WalletViewed,
    WalletUpdated,
    WalletFrozen,
    WalletUnfrozen,
    BalanceAdjusted,

    // Customer support
    TicketCreated,
    TicketUpdated,
    TicketAssigned,
    TicketClosed,

    // System configuration
    SettingsUpdated,

    // Data access
    DataViewed,
    DataExported,
    AuditLogsPurged,
}

macro_rules! name_table {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(Error::InvalidValue {
                        field: stringify!($ty),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

name_table!(AuditStatus {
    Success => "SUCCESS",
    Failure => "FAILURE",
    Warning => "WARNING",
});

name_table!(AuditSeverity {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});

name_table!(AuditCategory {
    Authentication => "AUTHENTICATION",
    Authorization => "AUTHORIZATION",
    UserManagement => "USER_MANAGEMENT",
    RoleManagement => "ROLE_MANAGEMENT",
    WalletManagement => "WALLET_MANAGEMENT",
    CustomerSupport => "CUSTOMER_SUPPORT",
    SystemConfiguration => "SYSTEM_CONFIGURATION",
    DataAccess => "DATA_ACCESS",
    Security => "SECURITY",
});

name_table!(AuditAction {
    Login => "LOGIN",
    Logout => "LOGOUT",
    LoginFailed => "LOGIN_FAILED",
    PasswordChanged => "PASSWORD_CHANGED",
    PasswordReset => "PASSWORD_RESET",
    PermissionDenied => "PERMISSION_DENIED",
    MenuAccessDenied => "MENU_ACCESS_DENIED",
    RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
    SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
    UserCreated => "USER_CREATED",
    UserUpdated => "USER_UPDATED",
    UserDeleted => "USER_DELETED",
    UserApproved => "USER_APPROVED",
    UserRejected => "USER_REJECTED",
    UserSuspended => "USER_SUSPENDED",
    UserViewed => "USER_VIEWED",
    RoleCreated => "ROLE_CREATED",
    RoleUpdated => "ROLE_UPDATED",
    RoleDeleted => "ROLE_DELETED",
    PermissionGranted => "PERMISSION_GRANTED",
    PermissionUpdated => "PERMISSION_UPDATED",
    PermissionRevoked => "PERMISSION_REVOKED",
    WalletViewed => "WALLET_VIEWED",
    WalletUpdated => "WALLET_UPDATED",
    WalletFrozen => "WALLET_FROZEN",
    WalletUnfrozen => "WALLET_UNFROZEN",
    BalanceAdjusted => "BALANCE_ADJUSTED",
    TicketCreated => "TICKET_CREATED",
    TicketUpdated => "TICKET_UPDATED",
    TicketAssigned => "TICKET_ASSIGNED",
    TicketClosed => "TICKET_CLOSED",
    SettingsUpdated => "SETTINGS_UPDATED",
    DataViewed => "DATA_VIEWED",
    DataExported => "DATA_EXPORTED",
    AuditLogsPurged => "AUDIT_LOGS_PURGED",
});

impl AuditAction {
    /// Category an action is filed under.
    pub fn category(&self) -> AuditCategory {
        use AuditAction::*;
        match self {
            Login | Logout | LoginFailed | PasswordChanged | PasswordReset => {
                AuditCategory::Authentication
            }
            PermissionDenied | MenuAccessDenied => AuditCategory::Authorization,
            RateLimitExceeded | SuspiciousActivity => AuditCategory::Security,
            UserCreated | UserUpdated | UserDeleted | UserApproved | UserRejected
            | UserSuspended | UserViewed => AuditCategory::UserManagement,
            RoleCreated | RoleUpdated | RoleDeleted | PermissionGranted | PermissionUpdated
            | PermissionRevoked => AuditCategory::RoleManagement,
            WalletViewed | WalletUpdated | WalletFrozen | WalletUnfrozen | BalanceAdjusted => {
                AuditCategory::WalletManagement
            }
            TicketCreated | TicketUpdated | TicketAssigned | TicketClosed => {
                AuditCategory::CustomerSupport
            }
            SettingsUpdated => AuditCategory::SystemConfiguration,
            DataViewed | DataExported | AuditLogsPurged => AuditCategory::DataAccess,
        }
    }

    /// Default severity for an action.
    pub fn severity(&self) -> AuditSeverity {
        use AuditAction::*;
        match self {
            Login | Logout | UserViewed | WalletViewed | DataViewed | TicketCreated
            | TicketUpdated | TicketAssigned | TicketClosed => AuditSeverity::Low,
            PasswordChanged | UserCreated | UserUpdated | UserApproved | RoleCreated
            | RoleUpdated | PermissionGranted | PermissionUpdated | WalletUpdated
            | WalletUnfrozen | SettingsUpdated | DataExported | MenuAccessDenied => {
                AuditSeverity::Medium
            }
            LoginFailed | PasswordReset | PermissionDenied | RateLimitExceeded | UserDeleted
            | UserRejected | UserSuspended | RoleDeleted | PermissionRevoked | WalletFrozen
            | AuditLogsPurged => AuditSeverity::High,
            SuspiciousActivity | BalanceAdjusted => AuditSeverity::Critical,
        }
    }

    /// Default subcategory for an action.
    pub fn subcategory(&self) -> &'static str {
        use AuditAction::*;
        match self {
            Login | Logout => "session",
            LoginFailed => "failed_login",
            PasswordChanged | PasswordReset => "credentials",
            PermissionDenied => "access_denied",
            MenuAccessDenied => "menu_access",
            RateLimitExceeded => "rate_limiting",
            SuspiciousActivity => "anomaly",
            UserCreated | UserUpdated | UserDeleted | UserViewed => "user_lifecycle",
            UserApproved | UserRejected | UserSuspended => "user_review",
            RoleCreated | RoleUpdated | RoleDeleted => "role_lifecycle",
            PermissionGranted | PermissionUpdated | PermissionRevoked => "permission_grant",
            WalletViewed | WalletUpdated => "wallet_access",
            WalletFrozen | WalletUnfrozen => "wallet_freeze",
            BalanceAdjusted => "balance",
            TicketCreated | TicketUpdated | TicketAssigned | TicketClosed => "ticket",
            SettingsUpdated => "settings",
            DataViewed => "read",
            DataExported => "export",
            AuditLogsPurged => "retention",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_tables_roundtrip() {
        for action in AuditAction::ALL {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), *action);
        }
        for category in AuditCategory::ALL {
            assert_eq!(category.as_str().parse::<AuditCategory>().unwrap(), *category);
        }
        assert!("NOT_AN_ACTION".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_serde_matches_name_table() {
        for action in AuditAction::ALL {
            let json = serde_json::to_string(action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
        let json = serde_json::to_string(&AuditCategory::UserManagement).unwrap();
        assert_eq!(json, "\"USER_MANAGEMENT\"");
    }

    #[test]
    fn test_permission_denied_lookup() {
        let action = AuditAction::PermissionDenied;
        assert_eq!(action.category(), AuditCategory::Authorization);
        assert_eq!(action.severity(), AuditSeverity::High);
        assert_eq!(action.subcategory(), "access_denied");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AuditSeverity::Critical > AuditSeverity::High);
        assert!(AuditSeverity::High > AuditSeverity::Medium);
    }
}
