//! Access Pattern Tracking
//!
//! Every observed cache access is folded into a [`CachePattern`] keyed by
//! the access's normalised key: variable segments (numeric IDs, UUIDs, long
//! hex digests, issue keys) collapse to `*`, so `sprint:42:issues:all:100`
//! and `sprint:43:issues:all:100` share the pattern
//! `sprint:*:issues:all:100`. The normalised pattern is itself a valid glob
//! covering every key it was derived from.
//!
//! The tracker also holds the optimizer's decisions (TTL multipliers and
//! compression flags) so the cache manager can consult them on write.

use std::collections::BTreeSet;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::time::Instant;

use crate::cache::glob;
use crate::cache::keys::DELIMITER;

/// Substrings that tag a pattern with a data category
pub const PATTERN_TAGS: [&str; 8] = [
    "sprint",
    "issues",
    "repository",
    "commits",
    "pull_requests",
    "comprehensive",
    "metrics",
    "velocity",
];

/// Accesses at which frequency stops raising priority
const FREQUENCY_SATURATION: f64 = 100.0;

const MIN_TTL_MULTIPLIER: f64 = 0.1;
const MAX_TTL_MULTIPLIER: f64 = 10.0;

/// Pattern priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PatternPriority {
    Low,
    Medium,
    High,
}

impl PatternPriority {
    /// Classify a `[0, 1]` score
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            PatternPriority::High
        } else if score >= 0.4 {
            PatternPriority::Medium
        } else {
            PatternPriority::Low
        }
    }
}

/// Aggregated access statistics for one key pattern
#[derive(Debug, Clone)]
pub struct CachePattern {
    pub key_pattern: String,
    pub frequency: u64,
    pub hits: u64,
    /// Rolling average payload size in bytes over accesses that saw one
    pub avg_size: f64,
    pub hit_rate: f64,
    pub last_accessed: Instant,
    pub priority: PatternPriority,
    pub tags: BTreeSet<String>,
    sized_samples: u64,
}

impl CachePattern {
    fn new(key_pattern: String, tags: BTreeSet<String>) -> Self {
        Self {
            key_pattern,
            frequency: 0,
            hits: 0,
            avg_size: 0.0,
            hit_rate: 0.0,
            last_accessed: Instant::now(),
            priority: PatternPriority::Low,
            tags,
            sized_samples: 0,
        }
    }

    fn record(&mut self, hit: bool, size: usize) {
        self.frequency += 1;
        if hit {
            self.hits += 1;
        }
        if size > 0 {
            self.sized_samples += 1;
            self.avg_size += (size as f64 - self.avg_size) / self.sized_samples as f64;
        }
        self.hit_rate = self.hits as f64 / self.frequency as f64;
        self.last_accessed = Instant::now();
        self.priority = PatternPriority::from_score(self.score());
    }

    /// Weighted priority score in `[0, 1]`
    pub fn score(&self) -> f64 {
        0.6 * (self.frequency as f64 / FREQUENCY_SATURATION).min(1.0) + 0.4 * self.hit_rate
    }

    /// Time since the last access
    pub fn idle_time(&self) -> Duration {
        self.last_accessed.elapsed()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Collapse variable segments of `key` to `*`, escaping the rest.
pub fn normalize_key(key: &str) -> String {
    key.split(DELIMITER)
        .map(|segment| {
            if is_variable_segment(segment) {
                "*".to_string()
            } else {
                glob::escape(segment)
            }
        })
        .collect::<Vec<_>>()
        .join(":")
}

fn is_variable_segment(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    let all_digits = segment.bytes().all(|b| b.is_ascii_digit());
    let long_hex = segment.len() >= 16 && segment.bytes().all(|b| b.is_ascii_hexdigit());
    all_digits || long_hex || is_uuid(segment) || is_issue_key(segment)
}

fn is_uuid(segment: &str) -> bool {
    let groups: Vec<&str> = segment.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// `PROJ-123` style tracker keys
fn is_issue_key(segment: &str) -> bool {
    let Some((project, number)) = segment.split_once('-') else {
        return false;
    };
    let mut project_bytes = project.bytes();
    project_bytes.next().is_some_and(|b| b.is_ascii_uppercase())
        && project_bytes.all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        && !number.is_empty()
        && number.bytes().all(|b| b.is_ascii_digit())
}

/// Derive category tags from key substrings
pub fn derive_tags(key: &str) -> BTreeSet<String> {
    let lower = key.to_ascii_lowercase();
    PATTERN_TAGS
        .iter()
        .filter(|tag| lower.contains(*tag))
        .map(|tag| tag.to_string())
        .collect()
}

/// Concurrent store of access patterns and per-pattern optimizer decisions
#[derive(Debug, Default)]
pub struct PatternTracker {
    patterns: DashMap<String, CachePattern>,
    ttl_multipliers: DashMap<String, f64>,
    compressed: DashSet<String>,
}

impl PatternTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one access into its pattern
    pub fn record_access(&self, key: &str, hit: bool, size: usize) {
        let normalized = normalize_key(key);
        self.patterns
            .entry(normalized.clone())
            .or_insert_with(|| CachePattern::new(normalized, derive_tags(key)))
            .record(hit, size);
    }

    /// Look up a pattern by its normalised form
    pub fn get(&self, key_pattern: &str) -> Option<CachePattern> {
        self.patterns.get(key_pattern).map(|p| p.clone())
    }

    /// Point-in-time copy of every tracked pattern, highest priority first
    pub fn snapshot(&self) -> Vec<CachePattern> {
        let mut patterns: Vec<CachePattern> =
            self.patterns.iter().map(|p| p.value().clone()).collect();
        patterns.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key_pattern.cmp(&b.key_pattern))
        });
        patterns
    }

    /// Multiplier applied to the TTL of writes to `key`
    pub fn ttl_multiplier(&self, key: &str) -> f64 {
        if self.ttl_multipliers.is_empty() {
            return 1.0;
        }
        self.ttl_multipliers
            .get(&normalize_key(key))
            .map(|m| *m)
            .unwrap_or(1.0)
    }

    /// Set the TTL multiplier for a pattern. Returns false if it already
    /// had this value.
    pub fn set_ttl_multiplier(&self, key_pattern: &str, multiplier: f64) -> bool {
        let multiplier = multiplier.clamp(MIN_TTL_MULTIPLIER, MAX_TTL_MULTIPLIER);
        let previous = self
            .ttl_multipliers
            .insert(key_pattern.to_string(), multiplier);
        previous.map_or(true, |p| (p - multiplier).abs() > f64::EPSILON)
    }

    /// True if writes to `key` should be LZ4-framed
    pub fn is_compressed(&self, key: &str) -> bool {
        !self.compressed.is_empty() && self.compressed.contains(&normalize_key(key))
    }

    /// True if a normalised pattern is flagged for compression
    pub fn is_pattern_compressed(&self, key_pattern: &str) -> bool {
        self.compressed.contains(key_pattern)
    }

    /// Flag a pattern for compression. Returns false if already flagged.
    pub fn mark_compressed(&self, key_pattern: &str) -> bool {
        self.compressed.insert(key_pattern.to_string())
    }

    /// Forget a pattern and every decision attached to it
    pub fn remove(&self, key_pattern: &str) {
        self.patterns.remove(key_pattern);
        self.ttl_multipliers.remove(key_pattern);
        self.compressed.remove(key_pattern);
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn clear(&self) {
        self.patterns.clear();
        self.ttl_multipliers.clear();
        self.compressed.clear();
    }
}
