//! sprintcache - Two-Tier Sprint/Report Cache
//!
//! Caches sprint, issue and report data fetched from external trackers so
//! expensive aggregations are computed once and survive backing-store
//! outages.
//!
//! # Architecture
//!
//! ```text
//!   domain events ──▶ InvalidationOrchestrator ──┐
//!                     TtlResolver ───────────────┤
//!                     RefreshScheduler ──────────┼──▶ CacheManager ──▶ LocalTier
//!                     CacheOptimizer ────────────┘         │
//!                                                          └──────▶ SharedStore
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Local and shared tiers behind the typed cache manager
//! - [`domain`] - Sprint concepts, collaborator ports and inbound events
//! - [`error`] - Error types
//! - [`invalidation`] - Pattern sweeps and post-completion warming
//! - [`optimizer`] - Access-pattern tracking and rule-driven tuning
//! - [`policy`] - Lifecycle-aware TTLs
//! - [`refresh`] - Stale-while-revalidate background refresh
//! - [`telemetry`] - Prometheus exposition

pub mod cache;
pub mod domain;
pub mod error;
pub mod invalidation;
pub mod optimizer;
pub mod policy;
pub mod refresh;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheManager, CacheStats, HealthReport, HealthStatus, SharedStore};
pub use domain::{DomainEvent, IssueChangeEvent, ReportParams, SprintState, SprintTransition};
pub use error::{CacheError, Result};
pub use invalidation::{InvalidationOrchestrator, InvalidationReport};
pub use optimizer::{CacheOptimizer, OptimizerConfig, PrefetchContext, PrefetchStrategy};
pub use policy::{TtlPolicy, TtlResolver};
pub use refresh::{RefreshConfig, RefreshDecision, RefreshScheduler};
