//! Prometheus Exposition
//!
//! Gauges mirroring [`CacheStats`]. They are refreshed from a stats
//! snapshot on every scrape rather than updated on the hot path, so the
//! cache itself never touches the registry.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::CacheStats;
use crate::error::{CacheError, Result};

/// Process-wide registry used by the binary
pub static REGISTRY: Lazy<Registry> =
    Lazy::new(|| Registry::new_custom(Some("sprintcache".to_string()), None).unwrap_or_default());

fn registration_error(e: prometheus::Error) -> CacheError {
    CacheError::Internal(format!("metric registration failed: {e}"))
}

/// Cache gauges registered in one registry
#[derive(Clone)]
pub struct CacheTelemetry {
    registry: Registry,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    operations: IntGaugeVec,
    latency_us: IntGaugeVec,
    hit_rate: Gauge,
    local_entries: IntGauge,
    local_bytes: IntGauge,
    local_utilization: Gauge,
    patterns_tracked: IntGauge,
}

impl CacheTelemetry {
    /// Create the gauges and register them in `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let hits = IntGaugeVec::new(Opts::new("cache_hits", "Lookups answered per tier"), &["tier"])
            .map_err(registration_error)?;
        let misses = IntGaugeVec::new(Opts::new("cache_misses", "Lookups missed per tier"), &["tier"])
            .map_err(registration_error)?;
        let operations = IntGaugeVec::new(
            Opts::new("cache_operations", "Cache operations by kind"),
            &["operation"],
        )
        .map_err(registration_error)?;
        let latency_us = IntGaugeVec::new(
            Opts::new("cache_latency_microseconds", "Moving-average latency per tier operation"),
            &["operation"],
        )
        .map_err(registration_error)?;
        let hit_rate = Gauge::new("cache_hit_rate", "Fraction of lookups answered by either tier")
            .map_err(registration_error)?;
        let local_entries = IntGauge::new("local_tier_entries", "Entries held by the local tier")
            .map_err(registration_error)?;
        let local_bytes = IntGauge::new("local_tier_bytes", "Payload bytes held by the local tier")
            .map_err(registration_error)?;
        let local_utilization = Gauge::new("local_tier_utilization", "Local tier fill ratio")
            .map_err(registration_error)?;
        let patterns_tracked = IntGauge::new("optimizer_patterns_tracked", "Distinct access patterns")
            .map_err(registration_error)?;

        registry.register(Box::new(hits.clone())).map_err(registration_error)?;
        registry.register(Box::new(misses.clone())).map_err(registration_error)?;
        registry.register(Box::new(operations.clone())).map_err(registration_error)?;
        registry.register(Box::new(latency_us.clone())).map_err(registration_error)?;
        registry.register(Box::new(hit_rate.clone())).map_err(registration_error)?;
        registry.register(Box::new(local_entries.clone())).map_err(registration_error)?;
        registry.register(Box::new(local_bytes.clone())).map_err(registration_error)?;
        registry.register(Box::new(local_utilization.clone())).map_err(registration_error)?;
        registry.register(Box::new(patterns_tracked.clone())).map_err(registration_error)?;

        Ok(Self {
            registry: registry.clone(),
            hits,
            misses,
            operations,
            latency_us,
            hit_rate,
            local_entries,
            local_bytes,
            local_utilization,
            patterns_tracked,
        })
    }

    /// Copy a stats snapshot into the gauges
    pub fn observe(&self, stats: &CacheStats) {
        let m = &stats.metrics;
        self.hits.with_label_values(&["local"]).set(m.l1_hits as i64);
        self.hits.with_label_values(&["shared"]).set(m.l2_hits as i64);
        self.misses.with_label_values(&["local"]).set(m.l1_misses as i64);
        self.misses.with_label_values(&["shared"]).set(m.l2_misses as i64);

        for (operation, value) in [
            ("set", m.sets),
            ("delete", m.deletes),
            ("error", m.errors),
            ("backfill", m.backfills),
            ("fallback_load", m.fallback_loads),
            ("capacity_eviction", m.capacity_evictions),
        ] {
            self.operations
                .with_label_values(&[operation])
                .set(value as i64);
        }

        for (operation, value) in [
            ("local_read", m.l1_read_latency_us),
            ("shared_read", m.l2_read_latency_us),
            ("shared_write", m.l2_write_latency_us),
        ] {
            self.latency_us
                .with_label_values(&[operation])
                .set(value as i64);
        }

        self.hit_rate.set(m.hit_rate);
        self.local_entries.set(stats.local.entries as i64);
        self.local_bytes.set(stats.local.size_bytes as i64);
        self.local_utilization.set(stats.local.utilization);
        self.patterns_tracked.set(stats.patterns_tracked as i64);
    }

    /// Render the registry in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| CacheError::Internal(format!("metric encoding failed: {e}")))?;
        Ok(buffer)
    }

    /// `Content-Type` of [`encode`](Self::encode) output
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}
