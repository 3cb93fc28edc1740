//! Optimization Rules
//!
//! A rule pairs a predicate over a [`CachePattern`] with the action to take
//! when it holds. Rules are evaluated in registration order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::pattern::CachePattern;

/// What a rule does to a matching pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OptimizationAction {
    /// Run prefetch strategies that depend on the pattern's tags
    Preload,
    /// Lengthen TTL of future writes by the rule's multiplier
    ExtendTtl,
    /// Shorten TTL of future writes by the rule's multiplier
    ReduceTtl,
    /// Delete every key of the pattern
    Evict,
    /// LZ4-frame future writes
    Compress,
}

impl fmt::Display for OptimizationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationAction::Preload => write!(f, "preload"),
            OptimizationAction::ExtendTtl => write!(f, "extend_ttl"),
            OptimizationAction::ReduceTtl => write!(f, "reduce_ttl"),
            OptimizationAction::Evict => write!(f, "evict"),
            OptimizationAction::Compress => write!(f, "compress"),
        }
    }
}

/// Predicate over a pattern
pub type RuleCondition = Arc<dyn Fn(&CachePattern) -> bool + Send + Sync>;

/// A named condition/action pair
#[derive(Clone)]
pub struct OptimizationRule {
    pub name: String,
    pub action: OptimizationAction,
    /// Action parameter, the TTL multiplier for TTL actions
    pub value: Option<f64>,
    pub enabled: bool,
    condition: RuleCondition,
}

impl OptimizationRule {
    pub fn new<F>(name: impl Into<String>, action: OptimizationAction, condition: F) -> Self
    where
        F: Fn(&CachePattern) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            action,
            value: None,
            enabled: true,
            condition: Arc::new(condition),
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// True if the rule is enabled and its condition holds
    pub fn applies_to(&self, pattern: &CachePattern) -> bool {
        self.enabled && (self.condition)(pattern)
    }
}

impl fmt::Debug for OptimizationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizationRule")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("value", &self.value)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Built-in rule set
pub fn default_rules() -> Vec<OptimizationRule> {
    vec![
        OptimizationRule::new("extend_ttl", OptimizationAction::ExtendTtl, |p| {
            p.frequency > 100 && p.hit_rate > 0.8
        })
        .with_value(1.5),
        OptimizationRule::new("evict", OptimizationAction::Evict, |p| {
            p.hit_rate < 0.2 && p.idle_time() > Duration::from_secs(5 * 60)
        }),
        OptimizationRule::new("reduce_ttl", OptimizationAction::ReduceTtl, |p| {
            p.avg_size > 10_000.0 && p.frequency < 10 && p.idle_time() > Duration::from_secs(3 * 60)
        })
        .with_value(0.5),
        OptimizationRule::new("preload", OptimizationAction::Preload, |p| {
            p.has_tag("sprint") && p.hit_rate > 0.6
        }),
        OptimizationRule::new("compress", OptimizationAction::Compress, |p| {
            p.avg_size > 50_000.0 && p.frequency > 50
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::pattern::PatternTracker;

    fn rule(name: &str) -> OptimizationRule {
        default_rules()
            .into_iter()
            .find(|r| r.name == name)
            .unwrap()
    }

    fn pattern(key: &str, accesses: u64, hits: u64, size: usize) -> CachePattern {
        let tracker = PatternTracker::new();
        for i in 0..accesses {
            tracker.record_access(key, i < hits, size);
        }
        tracker.snapshot().remove(0)
    }

    #[test]
    fn test_default_rule_order() {
        let names: Vec<_> = default_rules().into_iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec!["extend_ttl", "evict", "reduce_ttl", "preload", "compress"]
        );
    }

    #[test]
    fn test_extend_ttl_condition() {
        let extend = rule("extend_ttl");
        assert!(extend.applies_to(&pattern("sprint:1:issues", 120, 110, 10)));
        assert!(!extend.applies_to(&pattern("sprint:1:issues", 100, 100, 10)));
        assert_eq!(extend.value, Some(1.5));
    }

    #[test]
    fn test_preload_requires_sprint_tag() {
        let preload = rule("preload");
        assert!(preload.applies_to(&pattern("sprint:1:issues", 10, 9, 10)));
        assert!(!preload.applies_to(&pattern("repository:acme:commits", 10, 9, 10)));
    }

    #[test]
    fn test_compress_condition() {
        let compress = rule("compress");
        assert!(compress.applies_to(&pattern("comprehensive:1", 60, 60, 60_000)));
        assert!(!compress.applies_to(&pattern("comprehensive:1", 60, 60, 40_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_conditions() {
        let evict = rule("evict");
        let reduce = rule("reduce_ttl");
        let cold = pattern("sprint:1:metrics", 9, 1, 20_000);
        assert!(!evict.applies_to(&cold));
        assert!(!reduce.applies_to(&cold));

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        assert!(!evict.applies_to(&cold));
        assert!(reduce.applies_to(&cold));

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert!(evict.applies_to(&cold));
    }

    #[test]
    fn test_disabled_rule_never_applies() {
        let mut preload = rule("preload");
        preload.enabled = false;
        assert!(!preload.applies_to(&pattern("sprint:1:issues", 10, 10, 10)));
    }
}
