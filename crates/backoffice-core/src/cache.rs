//! Shared TTL cache.
//!
//! One cache instance is shared by the permission resolver and the rate
//! limiter. Callers keep to their own key namespaces (see [`keys`]). Besides
//! plain get/set the cache offers an atomic compare-and-swap, which is what the
//! rate limiter builds its counter updates on.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::Result;

/// Key namespaces.
pub mod keys {
    pub const USER_PERMISSIONS_PREFIX: &str = "user_permissions:";
    pub const RATE_LIMIT_PREFIX: &str = "rate_limit:";
    pub const ALL_ROLES: &str = "all_roles";

    pub fn user_permissions(principal_id: &str) -> String {
        format!("{}{}", USER_PERMISSIONS_PREFIX, principal_id)
    }
}

/// Key/value store with per-entry TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get a live value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Atomically replace the value at `key` with `value` if the live value
    /// equals `expected` (`None` meaning absent or expired).
    ///
    /// Returns `false` without writing when another writer got there first.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool>;
}

/// Typed JSON helpers on top of [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Entry count at which a write first sweeps expired entries.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 1024;

/// In-process cache for tests and single-node deployments.
///
/// Expired entries are dropped on read, and swept in bulk once a write pushes
/// the map past the sweep mark. The mark then resets to twice the live size,
/// so sweeps stay amortised against inserts.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    sweep_threshold: usize,
    sweep_at: AtomicUsize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            entries: DashMap::new(),
            sweep_threshold: threshold,
            sweep_at: AtomicUsize::new(threshold),
        }
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    /// Must not be called while holding an entry guard.
    fn sweep_if_due(&self) {
        if self.entries.len() < self.sweep_at.load(Ordering::Relaxed) {
            return;
        }
        let before = self.entries.len();
        self.purge_expired();
        let live = self.entries.len();
        self.sweep_at
            .store((live * 2).max(self.sweep_threshold), Ordering::Relaxed);
        debug!(removed = before.saturating_sub(live), live, "Swept expired cache entries");
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());

        if value.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
        self.sweep_if_due();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();

        let removed = matching
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count() as u64;

        debug!(prefix, removed, "Invalidated cache prefix");
        Ok(removed)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();

        // The entry guard holds the shard lock for the whole read-compare-write.
        let swapped = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = Some(occupied.get())
                    .filter(|entry| entry.is_live(now))
                    .map(|entry| entry.value.as_str());
                if current != expected {
                    return Ok(false);
                }
                occupied.insert(CacheEntry::new(value, ttl));
                true
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(CacheEntry::new(value, ttl));
                true
            }
        };

        self.sweep_if_due();
        Ok(swapped)
    }
}

const COMPARE_AND_SWAP_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local matches
if ARGV[1] == '0' then
    matches = (current == false)
else
    matches = (current == ARGV[2])
end
if matches then
    redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
    return 1
end
return 0
"#;

/// Redis-backed cache shared across API instances.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
    cas_script: redis::Script,
}

impl RedisCache {
    /// Create a cache on an existing connection manager.
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self {
            conn,
            cas_script: redis::Script::new(COMPARE_AND_SWAP_SCRIPT),
        }
    }

    /// Open a connection to `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, removed, "Invalidated cache prefix");
        Ok(removed)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let swapped: i64 = self
            .cas_script
            .key(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or(""))
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_writes_sweep_expired_entries() {
        let cache = MemoryCache::with_sweep_threshold(64);
        for i in 0..500 {
            let key = format!("rate_limit:10.0.{}.{}:/admin", i / 256, i % 256);
            assert!(cache
                .compare_and_swap(&key, None, "1", Duration::from_millis(200))
                .await
                .unwrap());
        }
        assert_eq!(cache.len(), 500);

        tokio::time::sleep(Duration::from_millis(300)).await;

        // The sweep mark sits at 512 after the first batch
        for i in 0..20 {
            let key = keys::user_permissions(&format!("u-{}", i));
            cache.set(&key, "{}", Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(cache.len(), 20);
        assert_eq!(
            cache.get(&keys::user_permissions("u-0")).await.unwrap(),
            Some("{}".to_string())
        );
    }

    #[tokio::test]
    async fn test_delete_prefix_keeps_other_namespaces() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set(&keys::user_permissions("1"), "a", ttl).await.unwrap();
        cache.set(&keys::user_permissions("2"), "b", ttl).await.unwrap();
        cache.set("rate_limit:ip:1.2.3.4", "c", ttl).await.unwrap();
        cache.set(keys::ALL_ROLES, "d", ttl).await.unwrap();

        let removed = cache.delete_prefix(keys::USER_PERMISSIONS_PREFIX).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(keys::ALL_ROLES).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);

        assert!(cache.compare_and_swap("k", None, "1", ttl).await.unwrap());
        // Absent expectation no longer holds.
        assert!(!cache.compare_and_swap("k", None, "x", ttl).await.unwrap());
        assert!(!cache.compare_and_swap("k", Some("0"), "x", ttl).await.unwrap());
        assert!(cache.compare_and_swap("k", Some("1"), "2", ttl).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_compare_and_swap_treats_expired_as_absent() {
        let cache = MemoryCache::new();
        cache.set("k", "old", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!cache
            .compare_and_swap("k", Some("old"), "new", Duration::from_secs(1))
            .await
            .unwrap());
        assert!(cache
            .compare_and_swap("k", None, "new", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_compare_and_swap_never_loses_updates() {
        let cache = std::sync::Arc::new(MemoryCache::new());
        let ttl = Duration::from_secs(60);
        cache.set("counter", "0", ttl).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    loop {
                        let current = cache.get("counter").await.unwrap().unwrap();
                        let next = (current.parse::<u64>().unwrap() + 1).to_string();
                        if cache
                            .compare_and_swap("counter", Some(&current), &next, ttl)
                            .await
                            .unwrap()
                        {
                            break;
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.get("counter").await.unwrap(), Some("400".to_string()));
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = MemoryCache::new();
        cache
            .set_json("j", &vec![1u32, 2, 3], Duration::from_secs(60))
            .await
            .unwrap();
        let value: Option<Vec<u32>> = cache.get_json("j").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }
}
