//! Domain Events
//!
//! Inbound change notifications the cache reacts to. They are produced by
//! tracker webhooks outside this crate and consumed by
//! [`InvalidationOrchestrator::handle_event`](crate::invalidation::InvalidationOrchestrator::handle_event).
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::IssueChanged(IssueChangeEvent {
//!     issue_key: "PROJ-7".to_string(),
//!     current_sprint_ids: vec!["12".to_string()],
//!     changes: vec![FieldChange::new("Sprint", Some("11"), Some("12"))],
//!     timestamp: Utc::now(),
//! });
//!
//! orchestrator.handle_event(&event).await;
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ports::{ReportParams, SprintState};

/// Field name the tracker uses for sprint membership changes
pub const SPRINT_FIELD: &str = "sprint";

/// Domain event the cache subsystem consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// An issue was edited, possibly moving between sprints
    IssueChanged(IssueChangeEvent),

    /// A sprint moved to a new lifecycle state
    SprintTransitioned(SprintTransition),
}

impl DomainEvent {
    /// Get event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::IssueChanged(_) => "IssueChanged",
            DomainEvent::SprintTransitioned(_) => "SprintTransitioned",
        }
    }
}

/// One field-level diff entry of an issue change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, from: Option<&str>, to: Option<&str>) -> Self {
        Self {
            field: field.into(),
            from: from.map(str::to_string),
            to: to.map(str::to_string),
        }
    }

    /// True if this diff entry records a sprint membership move
    pub fn is_sprint_move(&self) -> bool {
        self.field.eq_ignore_ascii_case(SPRINT_FIELD)
    }
}

/// An issue edit with its current sprint membership and field diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueChangeEvent {
    pub issue_key: String,
    /// Sprints the issue belongs to after the change
    pub current_sprint_ids: Vec<String>,
    pub changes: Vec<FieldChange>,
    pub timestamp: DateTime<Utc>,
}

impl IssueChangeEvent {
    /// Every sprint whose cached data the change can affect: current
    /// membership plus both sides of any sprint move. Deduplicated and
    /// sorted.
    pub fn affected_sprint_ids(&self) -> BTreeSet<String> {
        let moved = self
            .changes
            .iter()
            .filter(|c| c.is_sprint_move())
            .flat_map(|c| c.from.iter().chain(c.to.iter()))
            .flat_map(|ids| ids.split(','));

        self.current_sprint_ids
            .iter()
            .map(String::as_str)
            .chain(moved)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// A sprint lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintTransition {
    pub sprint_id: String,
    pub from: SprintState,
    pub to: SprintState,
    /// Report to pre-compute when the sprint reaches a terminal state
    pub report: ReportParams,
    pub timestamp: DateTime<Utc>,
}

impl SprintTransition {
    /// True when the sprint just completed
    pub fn is_completion(&self) -> bool {
        self.to.is_terminal() && !self.from.is_terminal()
    }
}

// =============================================================================
// Tests
// =============================================================================
