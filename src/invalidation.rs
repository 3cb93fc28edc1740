//! Cascading Invalidation
//!
//! Keeps sprint-scoped cache entries consistent with tracker changes. An
//! issue edit invalidates every sprint the issue touched (before and after
//! a sprint move); a sprint completing invalidates and then pre-computes
//! the sprint's expensive views.
//!
//! Each sprint owns four key families (issue lists, metrics, comprehensive
//! reports, cached lifecycle state). They are swept concurrently and each
//! sweep reports its own outcome, so one failing pattern never hides the
//! others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::keys::{comprehensive_report_key, sprint_invalidation_patterns, sprint_issues_key};
use crate::cache::CacheManager;
use crate::domain::{DomainEvent, IssueChangeEvent, ReportParams, SprintTransition, SprintWarmSource};

/// Issue list size pre-computed on warm
pub const WARM_ISSUE_LIMIT: u32 = 100;

/// Status segment of the pre-computed issue list key
pub const WARM_ISSUE_STATUS: &str = "all";

/// TTL of pre-computed entries
pub const WARM_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Outcome of sweeping one pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PatternOutcome {
    Deleted(usize),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternResult {
    pub pattern: String,
    pub outcome: PatternOutcome,
}

/// Per-pattern results of invalidating one sprint
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationReport {
    pub sprint_id: String,
    pub results: Vec<PatternResult>,
}

impl InvalidationReport {
    /// Patterns swept
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    /// Keys removed across all patterns
    pub fn deleted(&self) -> usize {
        self.results
            .iter()
            .map(|r| match r.outcome {
                PatternOutcome::Deleted(n) => n,
                PatternOutcome::Failed(_) => 0,
            })
            .sum()
    }

    /// Patterns whose sweep failed
    pub fn failures(&self) -> Vec<&PatternResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, PatternOutcome::Failed(_)))
            .collect()
    }

    /// True when every pattern was swept
    pub fn is_complete(&self) -> bool {
        self.failures().is_empty()
    }
}

/// Which pre-computed views were written by a warm
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmOutcome {
    pub issues_cached: bool,
    pub report_cached: bool,
    pub errors: Vec<String>,
}

impl WarmOutcome {
    pub fn writes(&self) -> usize {
        usize::from(self.issues_cached) + usize::from(self.report_cached)
    }
}

/// What handling a domain event did
#[derive(Debug, Clone, Serialize)]
pub enum EventOutcome {
    /// An issue change swept the affected sprints
    Invalidated(Vec<InvalidationReport>),
    /// A sprint transition swept the sprint and, on completion, warmed it
    Transitioned {
        invalidation: InvalidationReport,
        warm: Option<WarmOutcome>,
    },
}

/// Sweeps and re-populates sprint-scoped cache entries
pub struct InvalidationOrchestrator {
    cache: Arc<CacheManager>,
    source: Arc<dyn SprintWarmSource>,
    warm_ttl: Duration,
}

impl InvalidationOrchestrator {
    pub fn new(cache: Arc<CacheManager>, source: Arc<dyn SprintWarmSource>) -> Self {
        Self {
            cache,
            source,
            warm_ttl: WARM_TTL,
        }
    }

    /// Remove everything cached for one sprint
    pub async fn invalidate_entity(&self, sprint_id: &str) -> InvalidationReport {
        let patterns = sprint_invalidation_patterns(sprint_id);
        let sweeps = patterns.iter().map(|pattern| async move {
            let outcome = match self.cache.delete_pattern(pattern).await {
                Ok(count) => PatternOutcome::Deleted(count),
                Err(e) => {
                    warn!(sprint_id, pattern = %pattern, error = %e, "Invalidation sweep failed");
                    PatternOutcome::Failed(e.to_string())
                }
            };
            PatternResult {
                pattern: pattern.clone(),
                outcome,
            }
        });

        let report = InvalidationReport {
            sprint_id: sprint_id.to_string(),
            results: join_all(sweeps).await,
        };
        info!(
            sprint_id,
            deleted = report.deleted(),
            failed = report.failures().len(),
            "Invalidated sprint cache"
        );
        report
    }

    /// Invalidate every sprint an issue change can affect
    pub async fn invalidate_related(&self, event: &IssueChangeEvent) -> Vec<InvalidationReport> {
        let sprint_ids = event.affected_sprint_ids();
        if sprint_ids.is_empty() {
            debug!(issue = %event.issue_key, "Issue change touches no sprint");
            return Vec::new();
        }

        debug!(issue = %event.issue_key, sprints = ?sprint_ids, "Invalidating related sprints");
        join_all(sprint_ids.iter().map(|id| self.invalidate_entity(id))).await
    }

    /// Pre-compute the sprint's issue list and comprehensive report.
    ///
    /// Writes exactly two keys; a fetch that fails skips its write.
    pub async fn warm_entity(&self, sprint_id: &str, params: &ReportParams) -> WarmOutcome {
        let (issues, report) = tokio::join!(
            self.source.sprint_issues(sprint_id, WARM_ISSUE_LIMIT),
            self.source.comprehensive_report(sprint_id, params),
        );

        let mut outcome = WarmOutcome::default();

        match issues {
            Ok(issues) => {
                let key = sprint_issues_key(sprint_id, WARM_ISSUE_STATUS, WARM_ISSUE_LIMIT);
                self.cache.set(&key, &issues, Some(self.warm_ttl)).await;
                outcome.issues_cached = true;
            }
            Err(e) => {
                warn!(sprint_id, error = %e, "Failed to fetch sprint issues for warm");
                outcome.errors.push(format!("issues: {e}"));
            }
        }

        match report {
            Ok(report) => {
                let key = comprehensive_report_key(sprint_id, params);
                self.cache.set(&key, &report, Some(self.warm_ttl)).await;
                outcome.report_cached = true;
            }
            Err(e) => {
                warn!(sprint_id, error = %e, "Failed to build comprehensive report for warm");
                outcome.errors.push(format!("report: {e}"));
            }
        }

        info!(sprint_id, writes = outcome.writes(), "Warmed sprint cache");
        outcome
    }

    async fn handle_transition(&self, transition: &SprintTransition) -> EventOutcome {
        let invalidation = self.invalidate_entity(&transition.sprint_id).await;
        let warm = if transition.is_completion() {
            Some(
                self.warm_entity(&transition.sprint_id, &transition.report)
                    .await,
            )
        } else {
            None
        };
        EventOutcome::Transitioned { invalidation, warm }
    }

    /// Dispatch an inbound domain event
    pub async fn handle_event(&self, event: &DomainEvent) -> EventOutcome {
        debug!(event_type = event.event_type(), "Handling domain event");
        match event {
            DomainEvent::IssueChanged(change) => {
                EventOutcome::Invalidated(self.invalidate_related(change).await)
            }
            DomainEvent::SprintTransitioned(transition) => self.handle_transition(transition).await,
        }
    }
}
