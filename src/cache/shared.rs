//! Shared Tier - Distributed Key/Value Store
//!
//! The shared tier is visible across processes and reached over the
//! network, so every call is an await point and may fail. The cache manager
//! treats it purely as a byte store behind the [`SharedStore`] port.
//!
//! # Design
//!
//! - Batch calls (`get_many`, `set_many`, `delete_many`) map onto pipelined
//!   round trips in networked backends
//! - Key discovery is cursor-based (`scan`) with a bounded page size, never
//!   a full keyspace listing
//! - [`InMemorySharedStore`] backs tests and single-process deployments

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use super::glob::GlobPattern;
use crate::error::{CacheError, Result};

/// Shared tier configuration
#[derive(Debug, Clone)]
pub struct SharedTierConfig {
    /// Redis connection URL; `None` runs without a shared tier
    pub redis_url: Option<String>,
    /// `COUNT` hint per `SCAN` page
    pub scan_page_size: usize,
    /// Keys per pipelined delete batch
    pub delete_batch_size: usize,
}

impl Default for SharedTierConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            scan_page_size: 100,
            delete_batch_size: 1000,
        }
    }
}

/// Port for the shared tier.
///
/// A zero `ttl` means "no expiry".
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Backend name for logs and health output
    fn name(&self) -> &'static str;

    /// Get a payload
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Get several payloads in one round trip, positionally aligned with `keys`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    /// Store a payload
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Store several payloads in one round trip. Returns one success flag
    /// per entry.
    async fn set_many(&self, entries: &[(String, Bytes, Duration)]) -> Result<Vec<bool>>;

    /// Delete a key, returning true if it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete several keys in one round trip, one flag per key
    async fn delete_many(&self, keys: &[String]) -> Result<Vec<bool>>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remaining TTL; `None` for missing keys and keys without expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// One page of keys matching `pattern`, starting at `cursor`.
    ///
    /// Returns the next cursor (0 when iteration is complete) and the page.
    /// A page may be empty while the cursor is non-zero.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// Remove every key
    async fn flush(&self) -> Result<()>;

    /// Liveness probe
    async fn ping(&self) -> Result<()>;

    /// Number of keys held
    async fn key_count(&self) -> Result<u64>;
}

// =============================================================================
// In-Memory Backend
// =============================================================================

#[derive(Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Bytes, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: (!ttl.is_zero()).then(|| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process shared tier for tests and single-node deployments.
///
/// Can be switched offline to exercise the degradation paths: while
/// offline every call fails with [`CacheError::Backend`].
#[derive(Default)]
pub struct InMemorySharedStore {
    storage: DashMap<String, StoredValue>,
    offline: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    scans: AtomicU64,
}

impl InMemorySharedStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Read operations served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Write operations served
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Delete operations served
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Scan pages served
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    fn check_online(&self, operation: &str) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(CacheError::backend(operation, "connection refused"));
        }
        Ok(())
    }

    fn live(&self, key: &str) -> Option<StoredValue> {
        let value = self.storage.get(key).map(|v| v.clone())?;
        if value.is_expired() {
            self.storage.remove_if(key, |_, v| v.is_expired());
            return None;
        }
        Some(value)
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_online("get")?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.live(key).map(|v| v.data))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.check_online("mget")?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(keys.iter().map(|k| self.live(k).map(|v| v.data)).collect())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.check_online("set")?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage
            .insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Bytes, Duration)]) -> Result<Vec<bool>> {
        self.check_online("pipeline set")?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        for (key, value, ttl) in entries {
            self.storage
                .insert(key.clone(), StoredValue::new(value.clone(), *ttl));
        }
        Ok(vec![true; entries.len()])
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_online("del")?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .storage
            .remove(key)
            .is_some_and(|(_, v)| !v.is_expired()))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<bool>> {
        self.check_online("pipeline del")?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(keys
            .iter()
            .map(|k| self.storage.remove(k).is_some_and(|(_, v)| !v.is_expired()))
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_online("exists")?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check_online("pttl")?;
        Ok(self
            .live(key)
            .and_then(|v| v.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.check_online("scan")?;
        self.scans.fetch_add(1, Ordering::Relaxed);
        let matcher = GlobPattern::compile(pattern)?;

        // Cursor is an offset into the sorted keyspace; keys written between
        // pages may be missed or repeated, as with a real SCAN.
        let mut keys: Vec<String> = self.storage.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();

        let start = (cursor as usize).min(keys.len());
        let end = (start + count.max(1)).min(keys.len());
        let page = keys[start..end]
            .iter()
            .filter(|k| matcher.matches(k) && self.live(k).is_some())
            .cloned()
            .collect();
        let next = if end >= keys.len() { 0 } else { end as u64 };

        Ok((next, page))
    }

    async fn flush(&self) -> Result<()> {
        self.check_online("flushdb")?;
        self.storage.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_online("ping")
    }

    async fn key_count(&self) -> Result<u64> {
        self.check_online("dbsize")?;
        Ok(self.storage.len() as u64)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    async fn scan_all(store: &InMemorySharedStore, pattern: &str, page: usize) -> Vec<String> {
        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, keys) = store.scan(cursor, pattern, page).await.unwrap();
            found.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        found.sort();
        found
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemorySharedStore::new();
        store.set("k", Bytes::from_static(b"v"), HOUR).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
        assert!(store.exists("k").await.unwrap());
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = InMemorySharedStore::new();
        store.set("k", Bytes::from_static(b"v"), Duration::from_secs(10)).await.unwrap();
        store.set("forever", Bytes::from_static(b"v"), Duration::ZERO).await.unwrap();

        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(10)));
        assert_eq!(store.ttl("forever").await.unwrap(), None);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
        assert!(store.exists("forever").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let store = InMemorySharedStore::new();
        let entries: Vec<_> = (0..3)
            .map(|i| (format!("k{i}"), Bytes::from(format!("v{i}")), HOUR))
            .collect();
        assert_eq!(store.set_many(&entries).await.unwrap(), vec![true; 3]);

        let keys = vec!["k0".to_string(), "missing".to_string(), "k2".to_string()];
        let values = store.get_many(&keys).await.unwrap();
        assert_eq!(values[0], Some(Bytes::from("v0")));
        assert_eq!(values[1], None);
        assert_eq!(values[2], Some(Bytes::from("v2")));

        let deleted = store.delete_many(&keys).await.unwrap();
        assert_eq!(deleted, vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_scan_pages_cover_keyspace() {
        let store = InMemorySharedStore::new();
        for i in 0..250 {
            store
                .set(&format!("sprint:123:issues:{i}"), Bytes::from_static(b"1"), HOUR)
                .await
                .unwrap();
        }
        for i in 0..50 {
            store
                .set(&format!("sprint:9:issues:{i}"), Bytes::from_static(b"1"), HOUR)
                .await
                .unwrap();
        }

        let found = scan_all(&store, "sprint:123:*", 100).await;
        assert_eq!(found.len(), 250);
        assert!(store.scans() >= 3);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = InMemorySharedStore::new();
        store.set_offline(true);

        let err = store.get("k").await.unwrap_err();
        assert!(err.is_backend());
        assert!(store.ping().await.is_err());

        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_flush_and_count() {
        let store = InMemorySharedStore::new();
        store.set("a", Bytes::from_static(b"1"), HOUR).await.unwrap();
        store.set("b", Bytes::from_static(b"2"), HOUR).await.unwrap();
        assert_eq!(store.key_count().await.unwrap(), 2);

        store.flush().await.unwrap();
        assert_eq!(store.key_count().await.unwrap(), 0);
    }
}
