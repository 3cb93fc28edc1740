//! Two-Tier Cache
//!
//! A fast in-process tier in front of a shared distributed tier.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Cache Manager                         │
//! │          typed get/set, batch ops, pattern delete            │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │  Local Tier (in-process)     │  Shared Tier (SharedStore)    │
//! │  ┌────────────────────────┐  │  ┌─────────────────────────┐  │
//! │  │ DashMap + insertion seq│  │  │ Redis / in-memory       │  │
//! │  │ bounded entry count    │  │  │ SCAN, MGET, pipelines   │  │
//! │  │ backfill TTL <= 300s   │  │  │ authoritative TTLs      │  │
//! │  └────────────────────────┘  │  └─────────────────────────┘  │
//! └──────────────────────────────┴───────────────────────────────┘
//! ```
//!
//! Values cross the typed/bytes boundary in [`codec`]; payloads flagged by
//! the optimizer are LZ4-framed by [`compression`].

pub mod codec;
pub mod compression;
pub mod entry;
pub mod glob;
pub mod health;
pub mod keys;
pub mod local;
mod manager;
pub mod metrics;
#[cfg(feature = "redis")]
pub mod redis;
pub mod shared;

pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
pub use entry::{CacheEntry, EntryMeta};
pub use glob::GlobPattern;
pub use health::{HealthCheckResult, HealthReport, HealthStatus};
pub use local::{LocalTier, LocalTierConfig, LocalTierStats};
pub use manager::{BatchWriteSummary, CacheConfig, CacheInfo, CacheManager, CacheStats};
pub use metrics::{CacheMetrics, MetricsSnapshot};
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use shared::{InMemorySharedStore, SharedStore, SharedTierConfig};

/// Upper bound on how long a shared tier hit is mirrored locally
pub const BACKFILL_TTL_CAP_SECS: u64 = 300;
