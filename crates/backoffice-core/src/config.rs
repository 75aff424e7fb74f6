//! Configuration management for the backoffice.

use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub permissions: PermissionConfig,
    pub rate_limit: RateLimitConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis URL for the shared cache. When unset the in-memory cache is used.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionConfig {
    /// TTL for cached `user_permissions:{id}` entries.
    pub cache_ttl_secs: u64,
    /// Role that bypasses the permission store entirely.
    pub super_role: String,
}

impl PermissionConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 1800,
            super_role: "SUPER_ADMIN".to_string(),
        }
    }
}

/// A request quota applied to every path starting with `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
    pub pattern: String,
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitRule {
    pub fn new(pattern: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        Self {
            pattern: pattern.into(),
            max_requests,
            window_ms: window.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Path-prefix rules, matched longest-prefix first.
    pub rules: Vec<RateLimitRule>,
    /// Applied when no rule matches.
    pub default_rule: RateLimitRule,
    /// Minimum spacing between two requests on the same key.
    pub min_interval_ms: u64,
    /// Admit requests when the counter store cannot be reached.
    pub fail_open: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        const MINUTE: u64 = 60;
        Self {
            rules: vec![
                RateLimitRule::new("/auth/login", 5, Duration::from_secs(15 * MINUTE)),
                RateLimitRule::new("/auth/register", 3, Duration::from_secs(60 * MINUTE)),
                RateLimitRule::new("/admin", 200, Duration::from_secs(15 * MINUTE)),
            ],
            default_rule: RateLimitRule::new("default", 100, Duration::from_secs(15 * MINUTE)),
            min_interval_ms: 100,
            fail_open: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub retention_days: u32,
    /// Capacity of the non-blocking audit channel.
    pub channel_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 365,
            channel_capacity: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let permission_defaults = PermissionConfig::default();
        let rate_defaults = RateLimitConfig::default();
        let audit_defaults = AuditConfig::default();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| Error::Config {
                    message: "DATABASE_URL environment variable not set".to_string(),
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS")?.unwrap_or(5),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
            },
            permissions: PermissionConfig {
                cache_ttl_secs: parse_env("PERMISSION_CACHE_TTL_SECS")?
                    .unwrap_or(permission_defaults.cache_ttl_secs),
                super_role: env::var("SUPER_ROLE").unwrap_or(permission_defaults.super_role),
            },
            rate_limit: RateLimitConfig {
                min_interval_ms: parse_env("RATE_LIMIT_MIN_INTERVAL_MS")?
                    .unwrap_or(rate_defaults.min_interval_ms),
                fail_open: parse_env("RATE_LIMIT_FAIL_OPEN")?.unwrap_or(rate_defaults.fail_open),
                ..rate_defaults
            },
            audit: AuditConfig {
                retention_days: parse_env("AUDIT_RETENTION_DAYS")?
                    .unwrap_or(audit_defaults.retention_days),
                channel_capacity: parse_env("AUDIT_CHANNEL_CAPACITY")?
                    .unwrap_or(audit_defaults.channel_capacity),
            },
        })
    }

    /// Configuration for tests (no external services).
    pub fn test_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/backoffice_test".to_string(),
                max_connections: 2,
            },
            redis: RedisConfig { url: None },
            permissions: PermissionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// Read and parse an optional environment variable.
///
/// A variable that is set but unparsable is a configuration error rather than
/// a silent fallback to the default.
fn parse_env<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidValue {
                field: name,
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_limit_table() {
        let config = RateLimitConfig::default();
        assert_eq!(config.rules.len(), 3);
        assert_eq!(config.rules[0].pattern, "/auth/login");
        assert_eq!(config.rules[0].max_requests, 5);
        assert_eq!(config.rules[0].window_ms, 15 * 60 * 1000);
        assert_eq!(config.rules[1].max_requests, 3);
        assert_eq!(config.rules[1].window_ms, 60 * 60 * 1000);
        assert_eq!(config.default_rule.max_requests, 100);
        assert_eq!(config.min_interval_ms, 100);
        assert!(config.fail_open);
    }

    #[test]
    fn test_permission_defaults() {
        let config = PermissionConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(1800));
        assert_eq!(config.super_role, "SUPER_ADMIN");
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        env::set_var("BACKOFFICE_TEST_PARSE_ENV", "not-a-number");
        let parsed: Result<Option<u32>> = parse_env("BACKOFFICE_TEST_PARSE_ENV");
        assert!(matches!(parsed, Err(Error::InvalidValue { .. })));
        env::remove_var("BACKOFFICE_TEST_PARSE_ENV");

        let missing: Option<u32> = parse_env("BACKOFFICE_TEST_PARSE_ENV_MISSING").unwrap();
        assert!(missing.is_none());
    }
}
