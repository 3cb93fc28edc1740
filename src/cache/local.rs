//! Local Tier - In-Process Cache
//!
//! Bounded in-process key/value store sitting in front of the shared tier.
//!
//! # Design
//!
//! - `DashMap` storage: sharded locks, no global lock on the hot path
//! - Entry-count bound; an insert of a new key into a full tier fails with
//!   [`CacheError::CapacityExceeded`] and the caller decides how to relieve
//!   pressure
//! - Coarse eviction: drop a fraction of the oldest-inserted keys, ordered
//!   by a monotonic insertion sequence rather than strict recency

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;

use super::entry::CacheEntry;
use super::glob::GlobPattern;
use crate::error::{CacheError, Result};

/// Default maximum number of entries
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Local tier configuration
#[derive(Debug, Clone)]
pub struct LocalTierConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Fill ratio at which writers evict proactively
    pub high_watermark: f64,
    /// Fraction of keys dropped by a routine eviction pass
    pub eviction_fraction: f64,
    /// Fraction of keys dropped when batch writes are failing
    pub pressure_eviction_fraction: f64,
    /// Upper bound on TTL for values copied down from the shared tier
    pub backfill_ttl_cap: Duration,
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            high_watermark: 0.95,
            eviction_fraction: 0.10,
            pressure_eviction_fraction: 0.20,
            backfill_ttl_cap: Duration::from_secs(super::BACKFILL_TTL_CAP_SECS),
        }
    }
}

/// Local tier - bounded in-process cache
pub struct LocalTier {
    storage: DashMap<String, CacheEntry>,
    config: LocalTierConfig,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalTier {
    /// Create a new local tier with default configuration
    pub fn new() -> Self {
        Self::with_config(LocalTierConfig::default())
    }

    /// Create a new local tier with custom configuration
    pub fn with_config(config: LocalTierConfig) -> Self {
        Self {
            storage: DashMap::new(),
            config,
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &LocalTierConfig {
        &self.config
    }

    /// Get a payload, dropping it if it has expired
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let found = self
            .storage
            .get(key)
            .map(|e| (e.is_expired(), e.data().clone()));

        match found {
            Some((false, data)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            Some((true, _)) => {
                self.storage.remove_if(key, |_, e| e.is_expired());
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry.
    ///
    /// Replacing an existing key always succeeds; a new key is rejected once
    /// the tier holds `max_entries` entries.
    pub fn insert(&self, key: &str, data: Bytes, ttl: Duration) -> Result<()> {
        if !self.storage.contains_key(key) && self.storage.len() >= self.config.max_entries {
            return Err(CacheError::CapacityExceeded {
                capacity: self.config.max_entries,
            });
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.storage
            .insert(key.to_string(), CacheEntry::new(data, ttl, sequence));
        Ok(())
    }

    /// Remove an entry, returning true if a live entry was removed
    pub fn remove(&self, key: &str) -> bool {
        self.storage
            .remove(key)
            .map(|(_, e)| !e.is_expired())
            .unwrap_or(false)
    }

    /// Check if a live entry exists
    pub fn contains(&self, key: &str) -> bool {
        self.storage
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Remaining TTL of a live entry; `None` for missing keys and for
    /// entries without expiry
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        self.storage
            .get(key)
            .filter(|e| !e.is_expired())
            .and_then(|e| e.remaining_ttl())
    }

    /// Live keys in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.storage
            .iter()
            .filter(|e| !e.value().is_expired())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Remove every key matching `pattern`, returning the removed live keys
    pub fn remove_matching(&self, pattern: &GlobPattern) -> Vec<String> {
        let candidates: Vec<String> = self
            .storage
            .iter()
            .filter(|e| pattern.matches(e.key()))
            .map(|e| e.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter(|key| self.remove(key))
            .collect()
    }

    /// True once the tier has reached its high watermark
    pub fn should_evict(&self) -> bool {
        self.utilization() >= self.config.high_watermark
    }

    /// Drop `fraction` of the current keys, oldest-inserted first.
    ///
    /// Expired entries are swept first and do not count toward the quota.
    /// At least one key is dropped when the tier is non-empty.
    pub fn evict_oldest(&self, fraction: f64) -> usize {
        self.purge_expired();

        let mut by_age: Vec<(u64, String)> = self
            .storage
            .iter()
            .map(|e| (e.value().sequence(), e.key().clone()))
            .collect();
        if by_age.is_empty() {
            return 0;
        }
        by_age.sort_unstable_by_key(|(seq, _)| *seq);

        let quota = ((by_age.len() as f64 * fraction).ceil() as usize).clamp(1, by_age.len());
        let mut evicted = 0;
        for (_, key) in by_age.into_iter().take(quota) {
            if self.storage.remove(&key).is_some() {
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        tracing::debug!(evicted, fraction, "Local tier eviction pass");
        evicted
    }

    /// Remove expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let before = self.storage.len();
        self.storage.retain(|_, e| !e.is_expired());
        before.saturating_sub(self.storage.len())
    }

    /// Number of entries (including not-yet-purged expired ones)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if tier is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Total payload bytes held
    pub fn size_bytes(&self) -> u64 {
        self.storage.iter().map(|e| e.value().size() as u64).sum()
    }

    /// Fill ratio (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        if self.config.max_entries == 0 {
            return 1.0;
        }
        self.len() as f64 / self.config.max_entries as f64
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Clear the tier and its counters
    pub fn clear(&self) {
        self.storage.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Get tier statistics
    pub fn stats(&self) -> LocalTierStats {
        LocalTierStats {
            entries: self.len(),
            max_entries: self.config.max_entries,
            size_bytes: self.size_bytes(),
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            utilization: self.utilization(),
        }
    }
}

impl Default for LocalTier {
    fn default() -> Self {
        Self::new()
    }
}

/// Local tier statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct LocalTierStats {
    pub entries: usize,
    pub max_entries: usize,
    pub size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub utilization: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn small_tier(max_entries: usize) -> LocalTier {
        LocalTier::with_config(LocalTierConfig {
            max_entries,
            ..Default::default()
        })
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_insert_get() {
        let tier = LocalTier::new();
        tier.insert("sprint:1:issues:all:100", bytes("[]"), HOUR).unwrap();

        assert_eq!(tier.get("sprint:1:issues:all:100"), Some(bytes("[]")));
        assert_eq!(tier.hits(), 1);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_miss_tracking() {
        let tier = LocalTier::new();
        assert!(tier.get("missing").is_none());
        assert_eq!(tier.misses(), 1);
        assert_eq!(tier.hits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss() {
        let tier = LocalTier::new();
        tier.insert("k", bytes("v"), Duration::from_secs(5)).unwrap();
        assert!(tier.contains("k"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!tier.contains("k"));
        assert!(tier.get("k").is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_capacity_rejects_new_keys_only() {
        let tier = small_tier(2);
        tier.insert("a", bytes("1"), HOUR).unwrap();
        tier.insert("b", bytes("2"), HOUR).unwrap();

        let err = tier.insert("c", bytes("3"), HOUR).unwrap_err();
        assert!(matches!(err, CacheError::CapacityExceeded { capacity: 2 }));

        // Overwriting an existing key is fine
        tier.insert("a", bytes("updated"), HOUR).unwrap();
        assert_eq!(tier.get("a"), Some(bytes("updated")));
    }

    #[test]
    fn test_evict_oldest_first() {
        let tier = small_tier(100);
        for i in 0..20 {
            tier.insert(&format!("k{i}"), bytes("v"), HOUR).unwrap();
        }

        let evicted = tier.evict_oldest(0.10);
        assert_eq!(evicted, 2);
        assert!(!tier.contains("k0"));
        assert!(!tier.contains("k1"));
        assert!(tier.contains("k2"));
        assert_eq!(tier.evictions(), 2);
    }

    #[test]
    fn test_evict_at_least_one() {
        let tier = small_tier(100);
        tier.insert("only", bytes("v"), HOUR).unwrap();
        assert_eq!(tier.evict_oldest(0.10), 1);
        assert!(tier.is_empty());
        assert_eq!(tier.evict_oldest(0.10), 0);
    }

    #[test]
    fn test_reinsert_refreshes_age() {
        let tier = small_tier(100);
        for i in 0..10 {
            tier.insert(&format!("k{i}"), bytes("v"), HOUR).unwrap();
        }
        // k0 becomes the newest entry
        tier.insert("k0", bytes("v2"), HOUR).unwrap();
        tier.evict_oldest(0.10);
        assert!(tier.contains("k0"));
        assert!(!tier.contains("k1"));
    }

    #[test]
    fn test_remove_matching() {
        let tier = LocalTier::new();
        tier.insert("sprint:123:issues:all:100", bytes("1"), HOUR).unwrap();
        tier.insert("sprint:123:metrics:velocity", bytes("2"), HOUR).unwrap();
        tier.insert("sprint:124:issues:all:100", bytes("3"), HOUR).unwrap();

        let pattern = GlobPattern::compile("sprint:123:*").unwrap();
        let mut removed = tier.remove_matching(&pattern);
        removed.sort();

        assert_eq!(
            removed,
            vec!["sprint:123:issues:all:100", "sprint:123:metrics:velocity"]
        );
        assert!(tier.contains("sprint:124:issues:all:100"));
        assert!(tier.remove_matching(&pattern).is_empty());
    }

    #[test]
    fn test_watermark() {
        let tier = small_tier(20);
        for i in 0..18 {
            tier.insert(&format!("k{i}"), bytes("v"), HOUR).unwrap();
        }
        assert!(!tier.should_evict());
        tier.insert("k18", bytes("v"), HOUR).unwrap();
        assert!(tier.should_evict());
    }

    #[test]
    fn test_remaining_ttl() {
        let tier = LocalTier::new();
        tier.insert("forever", bytes("v"), Duration::ZERO).unwrap();
        tier.insert("hour", bytes("v"), HOUR).unwrap();

        assert_eq!(tier.remaining_ttl("forever"), None);
        assert_eq!(tier.remaining_ttl("missing"), None);
        let left = tier.remaining_ttl("hour").unwrap();
        assert!(left <= HOUR && left > Duration::from_secs(3590));
    }

    #[test]
    fn test_clear_and_stats() {
        let tier = LocalTier::new();
        tier.insert("a", bytes("abc"), HOUR).unwrap();
        tier.get("a");
        tier.get("b");

        let stats = tier.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.size_bytes, 3);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        tier.clear();
        assert!(tier.is_empty());
        assert_eq!(tier.hits(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let tier = Arc::new(LocalTier::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tier = Arc::clone(&tier);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("obj-{t}-{i}");
                        tier.insert(&key, Bytes::from_static(b"x"), HOUR).unwrap();
                        assert!(tier.get(&key).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tier.len(), 4000);
    }
}
