//! Cache Manager - Unified Two-Tier Cache
//!
//! Orchestrates the in-process local tier and the shared tier behind one
//! typed API. Reads go local first, then shared, backfilling the local tier
//! on a shared hit. Writes go to both tiers independently.
//!
//! # Failure model
//!
//! The read/write hot path never fails: a shared tier outage is logged,
//! counted, and the call carries on against the local tier. Only the
//! operations that promise removal (`delete`, `delete_pattern`, `clear`)
//! return errors, since a caller relying on invalidation must know when it
//! did not happen.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::codec;
use super::compression::{CompressionConfig, CompressionManager};
use super::glob::GlobPattern;
use super::health::{HealthCheckResult, HealthReport};
use super::keys::{DELIMITER, HEALTH_PREFIX, META_SUFFIX};
use super::local::{LocalTier, LocalTierConfig, LocalTierStats};
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::shared::{InMemorySharedStore, SharedStore, SharedTierConfig};
use crate::error::{CacheError, Result};
use crate::optimizer::pattern::PatternTracker;

/// Fraction of a batch that may fail before the local tier is trimmed
const BATCH_FAILURE_THRESHOLD: f64 = 0.3;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub local: LocalTierConfig,
    pub shared: SharedTierConfig,
    pub compression: CompressionConfig,
    /// TTL for writes that do not name one
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local: LocalTierConfig::default(),
            shared: SharedTierConfig::default(),
            compression: CompressionConfig::default(),
            default_ttl: Duration::from_secs(3600),
        }
    }
}

/// Outcome of a [`CacheManager::set_many`] call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchWriteSummary {
    pub attempted: usize,
    /// Entries that could not be encoded or stored locally
    pub local_failures: usize,
    /// Entries the shared tier did not accept
    pub shared_failures: usize,
    /// Local entries evicted because too much of the batch failed
    pub pressure_evictions: usize,
}

impl BatchWriteSummary {
    pub fn stored(&self) -> usize {
        self.attempted - self.local_failures
    }
}

/// Counters and tier sizes
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub metrics: MetricsSnapshot,
    pub local: LocalTierStats,
    pub patterns_tracked: usize,
}

/// Stats plus live information from the shared tier
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub stats: CacheStats,
    pub shared_backend: Option<String>,
    pub shared_connected: bool,
    pub shared_keys: Option<u64>,
    pub default_ttl_secs: u64,
}

#[derive(Serialize, Deserialize, PartialEq)]
struct HealthProbe {
    nonce: String,
}

/// Health probes and refresh metadata are bookkeeping, not access patterns
fn is_internal_key(key: &str) -> bool {
    key.starts_with(HEALTH_PREFIX)
        || key
            .strip_suffix(META_SUFFIX)
            .is_some_and(|rest| rest.ends_with(DELIMITER))
}

/// Unified cache manager
pub struct CacheManager {
    local: LocalTier,
    shared: RwLock<Option<Arc<dyn SharedStore>>>,
    config: CacheConfig,
    metrics: Arc<CacheMetrics>,
    patterns: Arc<PatternTracker>,
    compression: CompressionManager,
}

impl CacheManager {
    /// Create a manager over an optional shared tier
    pub fn new(config: CacheConfig, shared: Option<Arc<dyn SharedStore>>) -> Self {
        Self {
            local: LocalTier::with_config(config.local.clone()),
            shared: RwLock::new(shared),
            compression: CompressionManager::with_config(config.compression.clone()),
            config,
            metrics: Arc::new(CacheMetrics::new()),
            patterns: Arc::new(PatternTracker::new()),
        }
    }

    /// Create with an in-process shared tier (for testing)
    pub fn in_memory() -> Self {
        Self::new(
            CacheConfig::default(),
            Some(Arc::new(InMemorySharedStore::new())),
        )
    }

    /// Create without a shared tier
    pub fn local_only(config: CacheConfig) -> Self {
        Self::new(config, None)
    }

    /// Build from configuration, connecting to Redis when a URL is set.
    ///
    /// An unreachable server is not fatal: the manager starts local-only
    /// and reports itself degraded. A malformed URL is.
    pub async fn connect(config: CacheConfig) -> Result<Self> {
        let Some(url) = config.shared.redis_url.clone() else {
            info!("No shared tier URL configured, using in-process shared tier");
            return Ok(Self::new(config, Some(Arc::new(InMemorySharedStore::new()))));
        };

        #[cfg(feature = "redis")]
        {
            match super::redis::RedisStore::connect(&url).await {
                Ok(store) => Ok(Self::new(config, Some(Arc::new(store)))),
                Err(e @ CacheError::Config(_)) => Err(e),
                Err(e) => {
                    warn!(error = %e, "Shared tier unreachable, running local-only");
                    Ok(Self::local_only(config))
                }
            }
        }

        #[cfg(not(feature = "redis"))]
        {
            warn!(
                url = %url,
                "Built without the redis feature, using in-process shared tier"
            );
            Ok(Self::new(config, Some(Arc::new(InMemorySharedStore::new()))))
        }
    }

    fn shared(&self) -> Option<Arc<dyn SharedStore>> {
        self.shared.read().clone()
    }

    /// Explicit TTLs are kept exactly; only the default TTL is scaled by
    /// the optimizer's per-pattern multiplier.
    fn effective_ttl(&self, key: &str, ttl: Option<Duration>) -> Duration {
        if let Some(ttl) = ttl {
            return ttl;
        }
        let multiplier = self.patterns.ttl_multiplier(key);
        if (multiplier - 1.0).abs() < f64::EPSILON {
            self.config.default_ttl
        } else {
            self.config.default_ttl.mul_f64(multiplier)
        }
    }

    fn backfill_ttl(&self, ttl: Option<Duration>) -> Duration {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let cap = self.config.local.backfill_ttl_cap;
        if ttl.is_zero() {
            cap
        } else {
            ttl.min(cap)
        }
    }

    fn track(&self, key: &str, hit: bool, size: usize) {
        if !is_internal_key(key) {
            self.patterns.record_access(key, hit, size);
        }
    }

    /// Local insert with proactive eviction at the high watermark and one
    /// evict-and-retry on a capacity failure.
    fn store_local(&self, key: &str, payload: Bytes, ttl: Duration) -> bool {
        if self.local.should_evict() {
            let evicted = self.local.evict_oldest(self.config.local.eviction_fraction);
            self.metrics.record_capacity_evictions(evicted);
        }

        match self.local.insert(key, payload.clone(), ttl) {
            Ok(()) => true,
            Err(CacheError::CapacityExceeded { .. }) => {
                let evicted = self.local.evict_oldest(self.config.local.eviction_fraction);
                self.metrics.record_capacity_evictions(evicted);
                debug!(key, evicted, "Local tier full, evicted oldest entries");

                match self.local.insert(key, payload, ttl) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(key, error = %e, "Local tier write failed after eviction");
                        self.metrics.record_error();
                        false
                    }
                }
            }
            Err(e) => {
                warn!(key, error = %e, "Local tier write failed");
                self.metrics.record_error();
                false
            }
        }
    }

    fn decode_local<T: DeserializeOwned>(&self, key: &str) -> Option<(T, usize)> {
        let start = Instant::now();
        let payload = self.local.get(key);
        self.metrics.record_l1_read_latency(start.elapsed());

        let payload = match payload {
            Some(payload) => payload,
            None => {
                self.metrics.record_l1_miss();
                return None;
            }
        };

        match codec::decode(key, &payload, &self.compression) {
            Ok(value) => {
                self.metrics.record_l1_hit();
                Some((value, payload.len()))
            }
            Err(e) => {
                warn!(key, error = %e, "Dropping undecodable local entry");
                self.local.remove(key);
                self.metrics.record_l1_miss();
                self.metrics.record_error();
                None
            }
        }
    }

    async fn read_through<T: DeserializeOwned>(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Option<(T, usize)> {
        if let Some(found) = self.decode_local(key) {
            debug!(key, tier = "local", "Cache hit");
            return Some(found);
        }

        let Some(shared) = self.shared() else {
            self.metrics.record_l2_miss();
            return None;
        };

        let start = Instant::now();
        let result = shared.get(key).await;
        self.metrics.record_l2_read_latency(start.elapsed());

        let payload = match result {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.metrics.record_l2_miss();
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "Shared tier read failed, treating as miss");
                self.metrics.record_l2_miss();
                self.metrics.record_error();
                return None;
            }
        };

        match codec::decode::<T>(key, &payload, &self.compression) {
            Ok(value) => {
                self.metrics.record_l2_hit();
                debug!(key, tier = "shared", "Cache hit");
                let size = payload.len();
                if self.store_local(key, payload, self.backfill_ttl(ttl)) {
                    self.metrics.record_backfill();
                }
                Some((value, size))
            }
            Err(e) => {
                warn!(key, error = %e, "Undecodable shared tier payload, treating as miss");
                self.metrics.record_l2_miss();
                self.metrics.record_error();
                None
            }
        }
    }

    /// Get a value, checking the local tier and then the shared tier.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let found = self.read_through(key, None).await;
        self.track(key, found.is_some(), found.as_ref().map_or(0, |(_, size)| *size));
        if found.is_none() {
            debug!(key, "Cache miss");
        }
        found.map(|(value, _)| value)
    }

    /// Get a value, loading it with `fallback` on a full miss and caching
    /// the result under the same key with `ttl`.
    ///
    /// A failing fallback yields `None`.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
    ) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some((value, size)) = self.read_through(key, ttl).await {
            self.track(key, true, size);
            return Some(value);
        }
        self.track(key, false, 0);

        match fallback().await {
            Ok(value) => {
                self.metrics.record_fallback_load();
                self.set(key, &value, ttl).await;
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Fallback loader failed");
                self.metrics.record_error();
                None
            }
        }
    }

    /// Store a value in both tiers. Failures are logged and counted.
    ///
    /// `ttl` of `None` uses the configured default, scaled by the
    /// optimizer's multiplier for the key's pattern. An explicit `ttl` is
    /// stored as given; a zero TTL never expires.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let compress = self.patterns.is_compressed(key);
        let payload = match codec::encode_with(key, value, &self.compression, compress) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key, error = %e, "Refusing to cache unserializable value");
                self.metrics.record_error();
                return;
            }
        };
        let ttl = self.effective_ttl(key, ttl);

        self.metrics.record_set();
        self.store_local(key, payload.clone(), ttl);

        if let Some(shared) = self.shared() {
            let start = Instant::now();
            let result = shared.set(key, payload, ttl).await;
            self.metrics.record_l2_write_latency(start.elapsed());
            if let Err(e) = result {
                warn!(key, error = %e, "Shared tier write failed, value cached locally only");
                self.metrics.record_error();
            }
        }
        debug!(key, ttl_secs = ttl.as_secs(), "Cached value");
    }

    /// Get several values. Shared tier misses are fetched in one round trip.
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        let mut results: Vec<Option<T>> = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();

        for (idx, key) in keys.iter().enumerate() {
            match self.decode_local::<T>(key) {
                Some((value, size)) => {
                    self.track(key, true, size);
                    results.push(Some(value));
                }
                None => {
                    results.push(None);
                    missing.push(idx);
                }
            }
        }

        if missing.is_empty() {
            return results;
        }

        let fetched = match self.shared() {
            Some(shared) => {
                let missing_keys: Vec<String> = missing.iter().map(|&i| keys[i].clone()).collect();
                let start = Instant::now();
                let result = shared.get_many(&missing_keys).await;
                self.metrics.record_l2_read_latency(start.elapsed());
                match result {
                    Ok(values) => values,
                    Err(e) => {
                        warn!(count = missing_keys.len(), error = %e, "Shared tier batch read failed");
                        self.metrics.record_error();
                        vec![None; missing_keys.len()]
                    }
                }
            }
            None => vec![None; missing.len()],
        };

        let backfill_ttl = self.backfill_ttl(None);
        for (idx, payload) in missing.into_iter().zip(fetched) {
            let key = &keys[idx];
            let decoded = payload.and_then(|payload| {
                match codec::decode::<T>(key, &payload, &self.compression) {
                    Ok(value) => Some((value, payload)),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Undecodable shared tier payload");
                        self.metrics.record_error();
                        None
                    }
                }
            });

            match decoded {
                Some((value, payload)) => {
                    self.metrics.record_l2_hit();
                    self.track(key, true, payload.len());
                    if self.store_local(key, payload, backfill_ttl) {
                        self.metrics.record_backfill();
                    }
                    results[idx] = Some(value);
                }
                None => {
                    self.metrics.record_l2_miss();
                    self.track(key, false, 0);
                }
            }
        }

        results
    }

    /// Store several values with one shared tier round trip.
    ///
    /// If more than 30% of the batch cannot be stored locally, the oldest
    /// 20% of the local tier is evicted to relieve pressure.
    pub async fn set_many<T: Serialize>(
        &self,
        entries: &[(String, T)],
        ttl: Option<Duration>,
    ) -> BatchWriteSummary {
        let mut summary = BatchWriteSummary {
            attempted: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return summary;
        }

        let mut shared_batch = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let compress = self.patterns.is_compressed(key);
            let payload = match codec::encode_with(key, value, &self.compression, compress) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unserializable batch entry");
                    self.metrics.record_error();
                    summary.local_failures += 1;
                    summary.shared_failures += 1;
                    continue;
                }
            };
            let ttl = self.effective_ttl(key, ttl);

            self.metrics.record_set();
            if !self.store_local(key, payload.clone(), ttl) {
                summary.local_failures += 1;
            }
            shared_batch.push((key.clone(), payload, ttl));
        }

        if let Some(shared) = self.shared() {
            let start = Instant::now();
            let result = shared.set_many(&shared_batch).await;
            self.metrics.record_l2_write_latency(start.elapsed());
            match result {
                Ok(flags) => {
                    summary.shared_failures += flags.iter().filter(|ok| !**ok).count();
                }
                Err(e) => {
                    warn!(count = shared_batch.len(), error = %e, "Shared tier batch write failed");
                    self.metrics.record_error();
                    summary.shared_failures += shared_batch.len();
                }
            }
        }

        let failure_ratio = summary.local_failures as f64 / summary.attempted as f64;
        if failure_ratio > BATCH_FAILURE_THRESHOLD {
            summary.pressure_evictions = self
                .local
                .evict_oldest(self.config.local.pressure_eviction_fraction);
            self.metrics
                .record_capacity_evictions(summary.pressure_evictions);
            warn!(
                failed = summary.local_failures,
                attempted = summary.attempted,
                evicted = summary.pressure_evictions,
                "Batch write under memory pressure, trimmed local tier"
            );
        }

        summary
    }

    /// Delete a key from both tiers. Returns true if either tier held it.
    ///
    /// The local copy is removed even when the shared tier fails.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let local_removed = self.local.remove(key);
        let shared_removed = match self.shared() {
            Some(shared) => shared.delete(key).await.inspect_err(|e| {
                warn!(key, error = %e, "Shared tier delete failed");
                self.metrics.record_error();
            })?,
            None => false,
        };

        let removed = local_removed || shared_removed;
        if removed {
            self.metrics.record_delete();
        }
        Ok(removed)
    }

    /// Delete every key matching a glob pattern from both tiers.
    ///
    /// Returns the number of distinct keys removed. Shared tier keys are
    /// discovered page by page with `SCAN` and removed in pipelined
    /// batches; an error stops the sweep after the local tier has already
    /// been cleared.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let matcher = GlobPattern::compile(pattern)?;
        let mut removed: HashSet<String> =
            self.local.remove_matching(&matcher).into_iter().collect();

        if let Some(shared) = self.shared() {
            let scan_pattern = matcher.to_scan_pattern();
            let page_size = self.config.shared.scan_page_size.max(1);
            let batch_size = self.config.shared.delete_batch_size.max(1);

            let mut cursor = 0;
            let mut pending: Vec<String> = Vec::new();
            loop {
                let (next, keys) = shared
                    .scan(cursor, &scan_pattern, page_size)
                    .await
                    .inspect_err(|e| {
                        warn!(pattern, error = %e, "Shared tier scan failed");
                        self.metrics.record_error();
                    })?;
                pending.extend(keys.into_iter().filter(|k| matcher.matches(k)));

                while pending.len() >= batch_size {
                    let batch: Vec<String> = pending.drain(..batch_size).collect();
                    self.delete_batch(shared.as_ref(), batch, &mut removed)
                        .await?;
                }

                if next == 0 {
                    break;
                }
                cursor = next;
            }

            if !pending.is_empty() {
                self.delete_batch(shared.as_ref(), pending, &mut removed)
                    .await?;
            }
        }

        for _ in 0..removed.len() {
            self.metrics.record_delete();
        }
        debug!(pattern, removed = removed.len(), "Pattern delete complete");
        Ok(removed.len())
    }

    async fn delete_batch(
        &self,
        shared: &dyn SharedStore,
        batch: Vec<String>,
        removed: &mut HashSet<String>,
    ) -> Result<()> {
        let flags = shared.delete_many(&batch).await.inspect_err(|e| {
            warn!(count = batch.len(), error = %e, "Shared tier batch delete failed");
            self.metrics.record_error();
        })?;
        removed.extend(
            batch
                .into_iter()
                .zip(flags)
                .filter_map(|(key, deleted)| deleted.then_some(key)),
        );
        Ok(())
    }

    /// True if either tier holds the key
    pub async fn exists(&self, key: &str) -> bool {
        if self.local.contains(key) {
            return true;
        }
        match self.shared() {
            Some(shared) => shared.exists(key).await.unwrap_or_else(|e| {
                warn!(key, error = %e, "Shared tier exists check failed");
                self.metrics.record_error();
                false
            }),
            None => false,
        }
    }

    /// Remaining TTL. `None` for missing keys and keys without expiry.
    ///
    /// The shared tier is authoritative; the local tier answers when the
    /// shared tier has no expiring copy.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        if let Some(shared) = self.shared() {
            match shared.ttl(key).await {
                Ok(Some(ttl)) => return Some(ttl),
                Ok(None) => {}
                Err(e) => {
                    warn!(key, error = %e, "Shared tier TTL lookup failed");
                    self.metrics.record_error();
                }
            }
        }
        self.local.remaining_ttl(key)
    }

    /// Flush both tiers and reset counters
    pub async fn clear(&self) -> Result<()> {
        self.local.clear();
        if let Some(shared) = self.shared() {
            shared.flush().await?;
        }
        self.metrics.reset();
        self.patterns.clear();
        info!("Cache cleared");
        Ok(())
    }

    /// Counters and local tier size
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            metrics: self.metrics.snapshot(),
            local: self.local.stats(),
            patterns_tracked: self.patterns.len(),
        }
    }

    /// Stats plus a live view of the shared tier
    pub async fn info(&self) -> CacheInfo {
        let shared = self.shared();
        let (connected, keys) = match &shared {
            Some(store) => match store.key_count().await {
                Ok(count) => (true, Some(count)),
                Err(e) => {
                    debug!(error = %e, "Shared tier key count unavailable");
                    (false, None)
                }
            },
            None => (false, None),
        };

        CacheInfo {
            stats: self.stats(),
            shared_backend: shared.map(|s| s.name().to_string()),
            shared_connected: connected,
            shared_keys: keys,
            default_ttl_secs: self.config.default_ttl.as_secs(),
        }
    }

    /// Ping the shared tier and run a write/read/delete round trip.
    ///
    /// A shared tier failure degrades the report; a failed round trip makes
    /// it unhealthy.
    pub async fn health_check(&self) -> HealthReport {
        let mut checks = Vec::with_capacity(2);

        let start = Instant::now();
        let shared_check = match self.shared() {
            Some(shared) => match shared.ping().await {
                Ok(()) => HealthCheckResult::healthy("shared_tier"),
                Err(e) => HealthCheckResult::degraded("shared_tier", e.to_string()),
            },
            None => HealthCheckResult::degraded("shared_tier", "not connected, serving local tier only"),
        };
        checks.push(shared_check.with_duration(start.elapsed()));

        let start = Instant::now();
        let key = format!("{HEALTH_PREFIX}:{}", uuid::Uuid::new_v4());
        let probe = HealthProbe {
            nonce: uuid::Uuid::new_v4().to_string(),
        };
        self.set(&key, &probe, Some(Duration::from_secs(60))).await;
        let read_back: Option<HealthProbe> = self.get(&key).await;
        let cleanup = self.delete(&key).await;

        let round_trip = match (read_back, cleanup) {
            (Some(value), _) if value != probe => {
                HealthCheckResult::unhealthy("round_trip", "read back a different value")
            }
            (None, _) => HealthCheckResult::unhealthy("round_trip", "value not readable after write"),
            (Some(_), Err(e)) => HealthCheckResult::degraded("round_trip", format!("cleanup failed: {e}")),
            (Some(_), Ok(_)) => HealthCheckResult::healthy("round_trip"),
        };
        checks.push(round_trip.with_duration(start.elapsed()));

        HealthReport::new(checks)
    }

    /// Flush the local tier and drop the shared tier connection
    pub fn shutdown(&self) {
        self.local.clear();
        if let Some(shared) = self.shared.write().take() {
            info!(backend = shared.name(), "Shared tier connection released");
        }
    }

    /// True when a shared tier is attached
    pub fn has_shared_tier(&self) -> bool {
        self.shared.read().is_some()
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn patterns(&self) -> &Arc<PatternTracker> {
        &self.patterns
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::health::HealthStatus;
    use assert_matches::assert_matches;

    fn manager_with(shared: Arc<InMemorySharedStore>, max_entries: usize) -> CacheManager {
        let config = CacheConfig {
            local: LocalTierConfig {
                max_entries,
                ..Default::default()
            },
            ..Default::default()
        };
        CacheManager::new(config, Some(shared))
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let cache = CacheManager::in_memory();
        cache.set("sprint:1:metrics:velocity", &vec![1, 2, 3], None).await;

        let value: Option<Vec<i32>> = cache.get("sprint:1:metrics:velocity").await;
        assert_eq!(value, Some(vec![1, 2, 3]));
        assert_eq!(cache.stats().metrics.l1_hits, 1);
    }

    #[tokio::test]
    async fn test_shared_hit_backfills_local() {
        let shared = Arc::new(InMemorySharedStore::new());
        let cache = manager_with(shared.clone(), 100);
        shared
            .set("k", codec::encode("k", &7u32).unwrap(), Duration::from_secs(3600))
            .await
            .unwrap();

        let value: Option<u32> = cache.get("k").await;
        assert_eq!(value, Some(7));
        assert!(cache.local().contains("k"));

        let local_ttl = cache.local().remaining_ttl("k").unwrap();
        assert!(local_ttl <= Duration::from_secs(300));
        assert_eq!(cache.stats().metrics.backfills, 1);
    }

    #[tokio::test]
    async fn test_shared_outage_degrades_to_local() {
        let shared = Arc::new(InMemorySharedStore::new());
        let cache = manager_with(shared.clone(), 100);
        shared.set_offline(true);

        cache.set("k", "v", None).await;
        let value: Option<String> = cache.get("k").await;
        assert_eq!(value.as_deref(), Some("v"));

        let missing: Option<String> = cache.get("other").await;
        assert!(missing.is_none());
        assert!(cache.stats().metrics.errors >= 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_and_retries() {
        let cache = manager_with(Arc::new(InMemorySharedStore::new()), 10);
        for i in 0..25 {
            cache.set(&format!("k{i}"), &i, None).await;
        }

        assert!(cache.local().len() <= 10);
        assert!(cache.local().contains("k24"));
        assert!(!cache.local().contains("k0"));
    }

    #[tokio::test]
    async fn test_get_or_fetch_caches_fallback() {
        let cache = CacheManager::in_memory();
        let value = cache
            .get_or_fetch("report:1", Some(Duration::from_secs(60)), || async {
                Ok::<_, CacheError>("computed".to_string())
            })
            .await;
        assert_eq!(value.as_deref(), Some("computed"));

        let cached: Option<String> = cache.get("report:1").await;
        assert_eq!(cached.as_deref(), Some("computed"));
        assert_eq!(cache.stats().metrics.fallback_loads, 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_failing_fallback() {
        let cache = CacheManager::in_memory();
        let value: Option<String> = cache
            .get_or_fetch("report:2", None, || async {
                Err(CacheError::Source("tracker unavailable".into()))
            })
            .await;
        assert!(value.is_none());
        assert!(!cache.exists("report:2").await);
    }

    #[tokio::test]
    async fn test_get_many_mixes_tiers() {
        let shared = Arc::new(InMemorySharedStore::new());
        let cache = manager_with(shared.clone(), 100);
        cache.set("a", &1u8, None).await;
        shared
            .set("b", codec::encode("b", &2u8).unwrap(), Duration::ZERO)
            .await
            .unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values: Vec<Option<u8>> = cache.get_many(&keys).await;
        assert_eq!(values, vec![Some(1), Some(2), None]);
        assert!(cache.local().contains("b"));
    }

    #[tokio::test]
    async fn test_set_many_evicts_instead_of_dropping() {
        let cache = manager_with(Arc::new(InMemorySharedStore::new()), 10);
        let entries: Vec<(String, u32)> = (0..20).map(|i| (format!("k{i}"), i)).collect();

        let summary = cache.set_many(&entries, None).await;
        assert_eq!(summary.attempted, 20);
        assert_eq!(summary.local_failures, 0);
        assert_eq!(summary.shared_failures, 0);
        assert_eq!(summary.pressure_evictions, 0);
        assert!(cache.local().len() <= 10);
        assert!(cache.local().contains("k19"));
        assert!(!cache.local().contains("k0"));
        assert!(cache.stats().metrics.capacity_evictions > 0);
    }

    struct Flaky(bool);

    impl Serialize for Flaky {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            if self.0 {
                Err(serde::ser::Error::custom("refused"))
            } else {
                serializer.serialize_bool(true)
            }
        }
    }

    #[tokio::test]
    async fn test_set_many_pressure_eviction() {
        let cache = manager_with(Arc::new(InMemorySharedStore::new()), 100);
        let entries: Vec<(String, Flaky)> = (0..10)
            .map(|i| (format!("k{i}"), Flaky(i >= 6)))
            .collect();

        let summary = cache.set_many(&entries, None).await;
        assert_eq!(summary.local_failures, 4);
        assert_eq!(summary.stored(), 6);
        assert_eq!(summary.pressure_evictions, 2);
        assert_eq!(cache.local().len(), 4);
        assert!(!cache.local().contains("k0"));
    }

    #[tokio::test]
    async fn test_delete_reports_shared_failure() {
        let shared = Arc::new(InMemorySharedStore::new());
        let cache = manager_with(shared.clone(), 100);
        cache.set("k", "v", None).await;

        shared.set_offline(true);
        let err = cache.delete("k").await.unwrap_err();
        assert!(err.is_backend());
        assert!(!cache.local().contains("k"));
    }

    #[tokio::test]
    async fn test_delete_pattern_counts_distinct_keys() {
        let cache = CacheManager::in_memory();
        for i in 0..5 {
            cache.set(&format!("sprint:1:issues:{i}"), &i, None).await;
        }
        cache.set("sprint:2:issues:0", &0, None).await;

        assert_eq!(cache.delete_pattern("sprint:1:issues:*").await.unwrap(), 5);
        assert_eq!(cache.delete_pattern("sprint:1:issues:*").await.unwrap(), 0);
        assert!(cache.exists("sprint:2:issues:0").await);
    }

    #[tokio::test]
    async fn test_delete_pattern_rejects_bad_glob() {
        let cache = CacheManager::in_memory();
        let err = cache.delete_pattern("sprint:\\").await.unwrap_err();
        assert_matches!(err, CacheError::InvalidPattern { .. });
    }

    #[tokio::test]
    async fn test_ttl_prefers_shared() {
        let cache = CacheManager::in_memory();
        cache.set("k", "v", Some(Duration::from_secs(120))).await;
        let ttl = cache.ttl("k").await.unwrap();
        assert!(ttl <= Duration::from_secs(120) && ttl > Duration::from_secs(100));

        cache.set("forever", "v", Some(Duration::ZERO)).await;
        assert_eq!(cache.ttl("forever").await, None);
        assert_eq!(cache.ttl("missing").await, None);
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let cache = CacheManager::in_memory();
        cache.set("k", "v", None).await;
        let _: Option<String> = cache.get("k").await;

        cache.clear().await.unwrap();
        assert!(!cache.exists("k").await);
        let stats = cache.stats();
        assert_eq!(stats.metrics.sets, 0);
        assert_eq!(stats.local.entries, 0);
        assert_eq!(stats.patterns_tracked, 0);
    }

    #[tokio::test]
    async fn test_health_check() {
        let shared = Arc::new(InMemorySharedStore::new());
        let cache = manager_with(shared.clone(), 100);

        let report = cache.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(cache.stats().patterns_tracked, 0);
        assert!(cache.local().is_empty());

        shared.set_offline(true);
        let report = cache.health_check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(
            report.check("shared_tier").map(|c| c.status),
            Some(HealthStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_local_only_is_degraded() {
        let cache = CacheManager::local_only(CacheConfig::default());
        cache.set("k", "v", None).await;
        assert!(cache.exists("k").await);

        let report = cache.health_check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        let info = cache.info().await;
        assert!(!info.shared_connected);
        assert!(info.shared_backend.is_none());
    }

    #[tokio::test]
    async fn test_ttl_multiplier_scales_default_ttl() {
        let cache = CacheManager::in_memory();
        cache.patterns().set_ttl_multiplier("sprint:*:issues:all:*", 2.0);
        cache.set("sprint:4:issues:all:100", "v", None).await;

        let ttl = cache.ttl("sprint:4:issues:all:100").await.unwrap();
        assert!(ttl > Duration::from_secs(7190));
        assert!(ttl <= Duration::from_secs(7200));
    }

    #[tokio::test]
    async fn test_ttl_multiplier_keeps_explicit_ttl() {
        let cache = CacheManager::in_memory();
        cache.patterns().set_ttl_multiplier("sprint:*:issues:all:*", 2.0);
        cache
            .set("sprint:4:issues:all:100", "v", Some(Duration::from_secs(100)))
            .await;
        cache
            .set_many(&[("sprint:5:issues:all:100".to_string(), 1)], Some(Duration::from_secs(100)))
            .await;

        for key in ["sprint:4:issues:all:100", "sprint:5:issues:all:100"] {
            let ttl = cache.ttl(key).await.unwrap();
            assert!(ttl <= Duration::from_secs(100) && ttl > Duration::from_secs(90));
        }
    }

    #[tokio::test]
    async fn test_meta_and_health_keys_not_tracked() {
        let cache = CacheManager::in_memory();
        cache.set("sprint:4:metrics:velocity:meta", &1, None).await;
        let _: Option<u32> = cache.get("sprint:4:metrics:velocity:meta").await;
        let _: Option<u32> = cache.get("__health__:probe").await;
        assert!(cache.patterns().is_empty());

        let _: Option<u32> = cache.get("sprint:4:metrics:metadata").await;
        assert_eq!(cache.patterns().len(), 1);
    }

    #[tokio::test]
    async fn test_compressed_pattern_round_trip() {
        let cache = CacheManager::in_memory();
        cache.patterns().mark_compressed("report:*");
        let big = "sprint velocity ".repeat(500);

        cache.set("report:1", &big, None).await;
        let raw = cache.local().get("report:1").unwrap();
        assert!(CompressionManager::is_compressed(&raw));

        let value: Option<String> = cache.get("report:1").await;
        assert_eq!(value, Some(big));
    }

    #[tokio::test]
    async fn test_shutdown_releases_shared() {
        let cache = CacheManager::in_memory();
        cache.set("k", "v", None).await;
        cache.shutdown();
        assert!(!cache.has_shared_tier());
        assert!(cache.local().is_empty());
    }
}
