//! Access-Pattern Optimizer
//!
//! Periodically reviews the access patterns collected by the cache manager
//! and tunes the cache: TTL multipliers for hot or bulky patterns, eviction
//! of cold ones, compression of large ones, and prefetching of data hot
//! sprint patterns depend on.
//!
//! - **Patterns** (`pattern.rs`) - Access aggregation and key normalisation
//! - **Rules** (`rules.rs`) - Condition/action pairs evaluated per pattern
//! - **Prefetch** (`prefetch.rs`) - Key generators and bulk loaders

pub mod pattern;
pub mod prefetch;
pub mod rules;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheManager, CompressionAlgorithm};

pub use pattern::{CachePattern, PatternPriority, PatternTracker};
pub use prefetch::{PrefetchContext, PrefetchStrategy};
pub use rules::{default_rules, OptimizationAction, OptimizationRule};

/// Average entry size above which an uncompressed pattern is reported
const LARGE_ENTRY_BYTES: f64 = 50_000.0;

/// Optimizer configuration
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Period of the background loop
    pub interval: Duration,
    /// Reports kept in history
    pub history_limit: usize,
    /// TTL of prefetched entries
    pub warm_ttl: Duration,
    /// Hit rate below which a pattern is called out in recommendations
    pub low_hit_rate_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            history_limit: 100,
            warm_ttl: Duration::from_secs(30 * 60),
            low_hit_rate_threshold: 0.3,
        }
    }
}

/// Result of one optimization pass
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub timestamp: DateTime<Utc>,
    pub patterns_analyzed: usize,
    pub ttl_extended: usize,
    pub ttl_reduced: usize,
    pub patterns_evicted: usize,
    pub keys_evicted: usize,
    pub compressed: usize,
    pub preloaded: usize,
    /// Estimated bytes freed by eviction and compression
    pub space_reclaimed_bytes: u64,
    pub recommendations: Vec<String>,
    pub duration_ms: u64,
}

impl OptimizationReport {
    fn new(patterns_analyzed: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            patterns_analyzed,
            ttl_extended: 0,
            ttl_reduced: 0,
            patterns_evicted: 0,
            keys_evicted: 0,
            compressed: 0,
            preloaded: 0,
            space_reclaimed_bytes: 0,
            recommendations: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Total actions taken
    pub fn actions(&self) -> usize {
        self.ttl_extended + self.ttl_reduced + self.patterns_evicted + self.compressed + self.preloaded
    }
}

/// Result of [`CacheOptimizer::warm`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmReport {
    pub strategies_run: usize,
    pub keys_loaded: usize,
    pub failures: Vec<String>,
}

/// Rule-driven cache tuner
pub struct CacheOptimizer {
    cache: Arc<CacheManager>,
    config: OptimizerConfig,
    rules: RwLock<Vec<OptimizationRule>>,
    strategies: RwLock<Vec<PrefetchStrategy>>,
    history: Mutex<VecDeque<OptimizationReport>>,
    /// Context of the last explicit warm, reused by `preload`
    last_context: Mutex<PrefetchContext>,
}

impl CacheOptimizer {
    /// Create an optimizer with the default rule set
    pub fn new(cache: Arc<CacheManager>, config: OptimizerConfig) -> Self {
        Self {
            cache,
            config,
            rules: RwLock::new(default_rules()),
            strategies: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            last_context: Mutex::new(PrefetchContext::default()),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn add_rule(&self, rule: OptimizationRule) {
        debug!(rule = %rule.name, action = %rule.action, "Adding optimization rule");
        self.rules.write().push(rule);
    }

    /// Remove a rule by name, returning true if it existed
    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.name != name);
        rules.len() != before
    }

    /// Enable or disable a rule by name, returning true if it exists
    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.rules.write().iter_mut().find(|r| r.name == name) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn rules(&self) -> Vec<OptimizationRule> {
        self.rules.read().clone()
    }

    /// Register a prefetch strategy. Strategies run in descending priority.
    pub fn register_strategy(&self, strategy: PrefetchStrategy) {
        let mut strategies = self.strategies.write();
        strategies.push(strategy);
        strategies.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Past reports, oldest first
    pub fn history(&self) -> Vec<OptimizationReport> {
        self.history.lock().iter().cloned().collect()
    }

    /// Run every applicable rule against every tracked pattern.
    ///
    /// An evicted pattern is not considered by later rules in the same pass.
    pub async fn optimize(&self) -> OptimizationReport {
        let start = Instant::now();
        let tracker = self.cache.patterns().clone();
        let patterns = tracker.snapshot();
        let rules = self.rules();
        let mut report = OptimizationReport::new(patterns.len());
        let mut preloaded_strategies: HashSet<String> = HashSet::new();

        for pattern in &patterns {
            for rule in rules.iter().filter(|r| r.applies_to(pattern)) {
                match rule.action {
                    OptimizationAction::Evict => {
                        match self.cache.delete_pattern(&pattern.key_pattern).await {
                            Ok(removed) => {
                                tracker.remove(&pattern.key_pattern);
                                report.patterns_evicted += 1;
                                report.keys_evicted += removed;
                                report.space_reclaimed_bytes += (pattern.avg_size * removed as f64) as u64;
                                debug!(pattern = %pattern.key_pattern, removed, "Evicted cold pattern");
                            }
                            Err(e) => {
                                warn!(pattern = %pattern.key_pattern, error = %e, "Pattern eviction failed");
                            }
                        }
                        break;
                    }
                    OptimizationAction::ExtendTtl => {
                        let multiplier = rule.value.unwrap_or(1.5);
                        if tracker.set_ttl_multiplier(&pattern.key_pattern, multiplier) {
                            report.ttl_extended += 1;
                        }
                    }
                    OptimizationAction::ReduceTtl => {
                        let multiplier = rule.value.unwrap_or(0.5);
                        if tracker.set_ttl_multiplier(&pattern.key_pattern, multiplier) {
                            report.ttl_reduced += 1;
                        }
                    }
                    OptimizationAction::Compress => {
                        if tracker.mark_compressed(&pattern.key_pattern) {
                            report.compressed += 1;
                            let saving = 1.0 - CompressionAlgorithm::Lz4.typical_ratio();
                            report.space_reclaimed_bytes += (pattern.avg_size * saving) as u64;
                        }
                    }
                    OptimizationAction::Preload => {
                        report.preloaded += self.preload(pattern, &mut preloaded_strategies).await;
                    }
                }
            }
        }

        report.recommendations = self.recommendations(&patterns);
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            patterns = report.patterns_analyzed,
            actions = report.actions(),
            reclaimed_bytes = report.space_reclaimed_bytes,
            "Optimization pass complete"
        );

        let mut history = self.history.lock();
        history.push_back(report.clone());
        while history.len() > self.config.history_limit {
            history.pop_front();
        }

        report
    }

    /// Run strategies relevant to `pattern`'s tags, each at most once per pass
    async fn preload(&self, pattern: &CachePattern, already_run: &mut HashSet<String>) -> usize {
        let strategies: Vec<PrefetchStrategy> = self
            .strategies
            .read()
            .iter()
            .filter(|s| s.is_relevant(&pattern.tags) && !already_run.contains(&s.name))
            .cloned()
            .collect();
        if strategies.is_empty() {
            return 0;
        }

        let mut context = self.last_context.lock().clone();
        context.tags = pattern.tags.clone();

        let mut loaded = 0;
        for strategy in strategies {
            already_run.insert(strategy.name.clone());
            let keys: Vec<String> = strategy
                .generate_keys(&context)
                .into_iter()
                .filter(|k| !self.cache.local().contains(k))
                .collect();
            if keys.is_empty() {
                continue;
            }

            match strategy.load(keys).await {
                Ok(entries) => {
                    loaded += self
                        .cache
                        .set_many(&entries, Some(self.config.warm_ttl))
                        .await
                        .stored();
                }
                Err(e) => {
                    warn!(strategy = %strategy.name, error = %e, "Preload failed");
                }
            }
        }
        loaded
    }

    fn recommendations(&self, patterns: &[CachePattern]) -> Vec<String> {
        let mut recommendations = Vec::new();

        let low_hit = patterns
            .iter()
            .filter(|p| p.hit_rate < self.config.low_hit_rate_threshold)
            .count();
        if low_hit > 0 {
            recommendations.push(format!(
                "{low_hit} patterns have hit-rate below {:.0}%; review cache strategy",
                self.config.low_hit_rate_threshold * 100.0
            ));
        }

        let tracker = self.cache.patterns();
        let large_uncompressed = patterns
            .iter()
            .filter(|p| p.avg_size > LARGE_ENTRY_BYTES && !tracker.is_pattern_compressed(&p.key_pattern))
            .count();
        if large_uncompressed > 0 {
            recommendations.push(format!(
                "{large_uncompressed} patterns average over 50KB per entry without compression"
            ));
        }

        let utilization = self.cache.local().utilization();
        if utilization > 0.9 {
            recommendations.push(format!(
                "Local tier is {:.0}% full; consider raising max entries",
                utilization * 100.0
            ));
        }

        recommendations
    }

    /// Run every strategy for `context`, highest priority first, caching the
    /// loaded entries with the warm TTL.
    pub async fn warm(&self, context: &PrefetchContext) -> WarmReport {
        *self.last_context.lock() = context.clone();
        let strategies = self.strategies.read().clone();
        let mut report = WarmReport::default();

        for strategy in strategies {
            let keys = strategy.generate_keys(context);
            if keys.is_empty() {
                continue;
            }
            report.strategies_run += 1;

            match strategy.load(keys).await {
                Ok(entries) => {
                    let summary = self
                        .cache
                        .set_many(&entries, Some(self.config.warm_ttl))
                        .await;
                    report.keys_loaded += summary.stored();
                }
                Err(e) => {
                    warn!(strategy = %strategy.name, error = %e, "Warm strategy failed");
                    report.failures.push(format!("{}: {e}", strategy.name));
                }
            }
        }

        info!(
            strategies = report.strategies_run,
            keys = report.keys_loaded,
            "Cache warm complete"
        );
        report
    }

    /// Run optimization passes on the configured interval until cancelled
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(interval_secs = self.config.interval.as_secs(), "Starting cache optimizer");

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Cache optimizer shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.optimize().await;
                }
            }
        }
    }
}
