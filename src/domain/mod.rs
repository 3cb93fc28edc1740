//! Domain Layer
//!
//! Sprint-tracker concepts the cache is aware of.
//!
//! - **Ports** (`ports.rs`) - Collaborator traits and value objects
//! - **Events** (`events.rs`) - Inbound change notifications

pub mod events;
pub mod ports;

pub use events::{DomainEvent, FieldChange, IssueChangeEvent, SprintTransition};
pub use ports::{ReportParams, SprintState, SprintStateSource, SprintWarmSource};
