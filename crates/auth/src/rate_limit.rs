//! Sliding-window rate limiter with a minimum inter-request interval.
//!
//! Each `(client, path pattern)` pair owns one counter window in the shared
//! cache. Window updates go through [`Cache::compare_and_swap`] so two
//! concurrent requests can never both read `count = n` and both write `n + 1`.

use backoffice_core::cache::keys;
use backoffice_core::config::{RateLimitConfig, RateLimitRule};
use backoffice_core::Cache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_WINDOW: &str = "X-RateLimit-Window";

/// Upper bound on CAS retries before the update counts as a store failure.
const MAX_CAS_ATTEMPTS: usize = 16;

/// Counter state reported to the client, admitted or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub count: u32,
    pub reset_at_ms: i64,
    pub window_ms: u64,
}

impl RateLimitStatus {
    fn new(rule: &RateLimitRule, count: u32, reset_at_ms: i64) -> Self {
        Self {
            limit: rule.max_requests,
            remaining: rule.max_requests.saturating_sub(count),
            count,
            reset_at_ms,
            window_ms: rule.window_ms,
        }
    }

    /// Window reset as epoch seconds, rounded up.
    pub fn reset_epoch_secs(&self) -> i64 {
        (self.reset_at_ms + 999).div_euclid(1000)
    }

    pub fn window_secs(&self) -> u64 {
        self.window_ms.div_ceil(1000)
    }

    /// Response headers in a fixed order.
    pub fn headers(&self) -> [(&'static str, String); 4] {
        [
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_epoch_secs().to_string()),
            (HEADER_WINDOW, self.window_secs().to_string()),
        ]
    }
}

/// Persisted window, stored as JSON under the client key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RateLimitWindow {
    count: u32,
    window_start_ms: i64,
    window_ms: u64,
    reset_at_ms: i64,
    last_request_at_ms: i64,
}

impl RateLimitWindow {
    fn open(rule: &RateLimitRule, now_ms: i64) -> Self {
        Self {
            count: 1,
            window_start_ms: now_ms,
            window_ms: rule.window_ms,
            reset_at_ms: now_ms + rule.window_ms as i64,
            last_request_at_ms: now_ms,
        }
    }

    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.reset_at_ms
    }
}

enum Step {
    Write(RateLimitWindow),
    Reject(AccessError),
}

pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    /// Rule for a path: longest matching prefix, else the default rule.
    pub fn rule_for(&self, path: &str) -> &RateLimitRule {
        self.config
            .rules
            .iter()
            .filter(|rule| path.starts_with(rule.pattern.as_str()))
            .max_by_key(|rule| rule.pattern.len())
            .unwrap_or(&self.config.default_rule)
    }

    /// Cache key for the request: `rate_limit:{identity}:{ua_hash}:{pattern}`.
    pub fn client_key(&self, ctx: &RequestContext, rule: &RateLimitRule) -> String {
        let identity = match ctx.principal_id() {
            Some(id) => format!("user:{}", id),
            None => format!("ip:{}", ctx.client_ip.as_deref().unwrap_or("unknown")),
        };
        format!(
            "{}{}:{}:{}",
            keys::RATE_LIMIT_PREFIX,
            identity,
            user_agent_hash(ctx.user_agent.as_deref()),
            rule.pattern
        )
    }

    /// Admit or reject the request at the current time.
    pub async fn check(&self, ctx: &RequestContext) -> AccessResult<RateLimitStatus> {
        self.check_at(ctx, Utc::now()).await
    }

    /// Admit or reject the request as if it arrived at `now`.
    pub async fn check_at(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> AccessResult<RateLimitStatus> {
        let rule = self.rule_for(&ctx.path);
        let key = self.client_key(ctx, rule);
        let now_ms = now.timestamp_millis();

        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = match self.cache.get(&key).await {
                Ok(current) => current,
                Err(e) => return self.on_store_failure(rule, now_ms, e),
            };

            let window = current
                .as_deref()
                .and_then(|raw| serde_json::from_str::<RateLimitWindow>(raw).ok());

            let next = match self.step(rule, window, now_ms) {
                Step::Write(next) => next,
                Step::Reject(err) => {
                    debug!(key = %key, error = %err, "Request rejected by rate limiter");
                    return Err(err);
                }
            };

            let raw = serde_json::to_string(&next).map_err(backoffice_core::Error::from)?;
            let ttl_ms = (next.reset_at_ms - now_ms).max(1) as u64;

            match self
                .cache
                .compare_and_swap(&key, current.as_deref(), &raw, Duration::from_millis(ttl_ms))
                .await
            {
                Ok(true) => return Ok(RateLimitStatus::new(rule, next.count, next.reset_at_ms)),
                Ok(false) => {
                    debug!(key = %key, attempt, "Rate limit window contended, retrying");
                }
                Err(e) => return self.on_store_failure(rule, now_ms, e),
            }
        }

        self.on_store_failure(
            rule,
            now_ms,
            backoffice_core::Error::Cache {
                message: format!("compare-and-swap contention on {}", key),
            },
        )
    }

    fn step(&self, rule: &RateLimitRule, window: Option<RateLimitWindow>, now_ms: i64) -> Step {
        let window = match window {
            Some(w) if !w.is_expired(now_ms) => w,
            _ => return Step::Write(RateLimitWindow::open(rule, now_ms)),
        };

        let status = RateLimitStatus::new(rule, window.count, window.reset_at_ms);

        if window.count >= rule.max_requests {
            return Step::Reject(AccessError::RateLimitExceeded { status });
        }

        if now_ms - window.last_request_at_ms < self.config.min_interval_ms as i64 {
            return Step::Reject(AccessError::RequestTooFrequent { status });
        }

        Step::Write(RateLimitWindow {
            count: window.count + 1,
            last_request_at_ms: now_ms,
            ..window
        })
    }

    fn on_store_failure(
        &self,
        rule: &RateLimitRule,
        now_ms: i64,
        error: backoffice_core::Error,
    ) -> AccessResult<RateLimitStatus> {
        if self.config.fail_open {
            warn!(pattern = %rule.pattern, error = %error, "Rate limit store unavailable, admitting request");
            Ok(RateLimitStatus::new(rule, 0, now_ms + rule.window_ms as i64))
        } else {
            warn!(pattern = %rule.pattern, error = %error, "Rate limit store unavailable, rejecting request");
            Err(AccessError::StoreUnavailable(error))
        }
    }
}

fn user_agent_hash(user_agent: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.unwrap_or_default().as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(8);
    digest
}
