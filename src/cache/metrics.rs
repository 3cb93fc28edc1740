//! Cache Metrics Collection
//!
//! Operation counters and latency averages for the cache manager. All
//! fields are relaxed atomics; readers get an approximate but cheap view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// EMA smoothing factor for latency tracking
const LATENCY_ALPHA: f64 = 0.1;

/// Exponential moving average of an operation latency, in microseconds
#[derive(Debug, Default)]
pub struct LatencyTracker {
    ema_us: AtomicU64,
}

impl LatencyTracker {
    /// Fold a new sample into the average
    pub fn record(&self, duration: Duration) {
        let sample = duration.as_micros() as u64;
        let _ = self
            .ema_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current == 0 {
                    sample
                } else {
                    ((1.0 - LATENCY_ALPHA) * current as f64 + LATENCY_ALPHA * sample as f64) as u64
                })
            });
    }

    /// Current average
    pub fn get(&self) -> Duration {
        Duration::from_micros(self.ema_us.load(Ordering::Relaxed))
    }

    fn reset(&self) {
        self.ema_us.store(0, Ordering::Relaxed);
    }
}

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Tier-1
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,

    // Tier-2
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,

    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    backfills: AtomicU64,
    fallback_loads: AtomicU64,
    capacity_evictions: AtomicU64,

    l1_read_latency: LatencyTracker,
    l2_read_latency: LatencyTracker,
    l2_write_latency: LatencyTracker,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_miss(&self) {
        self.l2_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A Tier-2 hit was copied into Tier-1
    pub fn record_backfill(&self) {
        self.backfills.fetch_add(1, Ordering::Relaxed);
    }

    /// A full miss was served by the caller's fallback
    pub fn record_fallback_load(&self) {
        self.fallback_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capacity_evictions(&self, count: usize) {
        self.capacity_evictions
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_l1_read_latency(&self, duration: Duration) {
        self.l1_read_latency.record(duration);
    }

    pub fn record_l2_read_latency(&self, duration: Duration) {
        self.l2_read_latency.record(duration);
    }

    pub fn record_l2_write_latency(&self, duration: Duration) {
        self.l2_write_latency.record(duration);
    }

    /// Overall hits: a Tier-1 or Tier-2 hit
    pub fn hits(&self) -> u64 {
        self.l1_hits.load(Ordering::Relaxed) + self.l2_hits.load(Ordering::Relaxed)
    }

    /// Overall misses: lookups neither tier could answer
    pub fn misses(&self) -> u64 {
        self.l2_misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Fraction of lookups answered by either tier
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors(),
            backfills: self.backfills.load(Ordering::Relaxed),
            fallback_loads: self.fallback_loads.load(Ordering::Relaxed),
            capacity_evictions: self.capacity_evictions.load(Ordering::Relaxed),
            l1_read_latency_us: self.l1_read_latency.get().as_micros() as u64,
            l2_read_latency_us: self.l2_read_latency.get().as_micros() as u64,
            l2_write_latency_us: self.l2_write_latency.get().as_micros() as u64,
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.l1_hits,
            &self.l1_misses,
            &self.l2_hits,
            &self.l2_misses,
            &self.sets,
            &self.deletes,
            &self.errors,
            &self.backfills,
            &self.fallback_loads,
            &self.capacity_evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.l1_read_latency.reset();
        self.l2_read_latency.reset();
        self.l2_write_latency.reset();
    }
}

/// Point-in-time view of [`CacheMetrics`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub backfills: u64,
    pub fallback_loads: u64,
    pub capacity_evictions: u64,
    pub l1_read_latency_us: u64,
    pub l2_read_latency_us: u64,
    pub l2_write_latency_us: u64,
}
