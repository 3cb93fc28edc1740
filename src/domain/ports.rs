//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions for the collaborators the cache calls back into. The route
//! handlers and tracker clients that implement these live outside this
//! crate; tests use small in-process fakes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Cache Layer                           │
//! │   TtlResolver ──▶ SprintStateSource                          │
//! │   InvalidationOrchestrator ──▶ SprintWarmSource              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Tracker / code-host clients (outside this crate)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Lifecycle state of a sprint as reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintState {
    /// In progress, data changes constantly
    Active,
    /// Completed, data is effectively immutable
    Closed,
    /// Planned but not started
    Future,
    /// Anything the tracker reports that we do not recognise
    #[serde(other)]
    Unknown,
}

impl SprintState {
    /// Parse the tracker's state string (case-insensitive)
    pub fn parse(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "active" => SprintState::Active,
            "closed" => SprintState::Closed,
            "future" => SprintState::Future,
            _ => SprintState::Unknown,
        }
    }

    /// True once the sprint can no longer change
    pub fn is_terminal(&self) -> bool {
        *self == SprintState::Closed
    }
}

impl std::fmt::Display for SprintState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SprintState::Active => write!(f, "active"),
            SprintState::Closed => write!(f, "closed"),
            SprintState::Future => write!(f, "future"),
            SprintState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Parameters of the comprehensive sprint report.
///
/// The owner/repo pair names the code repository the report correlates
/// with; the flags select which report sections are computed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportParams {
    pub owner: String,
    pub repo: String,
    pub include_commits: bool,
    pub include_pull_requests: bool,
    pub include_velocity: bool,
    pub include_burndown: bool,
    pub include_team_performance: bool,
}

impl ReportParams {
    /// Full report (every section enabled) for `owner/repo`
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            include_commits: true,
            include_pull_requests: true,
            include_velocity: true,
            include_burndown: true,
            include_team_performance: true,
        }
    }

    /// Section flags in key order
    pub fn flags(&self) -> [bool; 5] {
        [
            self.include_commits,
            self.include_pull_requests,
            self.include_velocity,
            self.include_burndown,
            self.include_team_performance,
        ]
    }
}

// =============================================================================
// Sprint State Port
// =============================================================================

/// Port for looking up a sprint's lifecycle state.
#[async_trait]
pub trait SprintStateSource: Send + Sync {
    /// Current state, or `None` when the tracker does not know the sprint.
    async fn sprint_state(&self, sprint_id: &str) -> Result<Option<SprintState>>;
}

// =============================================================================
// Warm Source Port
// =============================================================================

/// Port for the expensive fetches the cache pre-populates when a sprint
/// completes.
#[async_trait]
pub trait SprintWarmSource: Send + Sync {
    /// Full issue list for the sprint, capped at `max_results`
    async fn sprint_issues(&self, sprint_id: &str, max_results: u32) -> Result<serde_json::Value>;

    /// The aggregated comprehensive report
    async fn comprehensive_report(
        &self,
        sprint_id: &str,
        params: &ReportParams,
    ) -> Result<serde_json::Value>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprint_state_parse() {
        assert_eq!(SprintState::parse("ACTIVE"), SprintState::Active);
        assert_eq!(SprintState::parse(" closed "), SprintState::Closed);
        assert_eq!(SprintState::parse("future"), SprintState::Future);
        assert_eq!(SprintState::parse("archived"), SprintState::Unknown);
    }

    #[test]
    fn test_sprint_state_serde() {
        assert_eq!(
            serde_json::to_string(&SprintState::Closed).unwrap(),
            "\"closed\""
        );
        let unknown: SprintState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(unknown, SprintState::Unknown);
    }

    #[test]
    fn test_terminal_state() {
        assert!(SprintState::Closed.is_terminal());
        assert!(!SprintState::Active.is_terminal());
    }

    #[test]
    fn test_report_params_defaults() {
        let params = ReportParams::new("o", "r");
        assert_eq!(params.flags(), [true; 5]);
    }
}
