//! Cache Entry Types
//!
//! Tier-1 entries carry the serialized payload plus the bookkeeping needed
//! for expiry and oldest-first eviction. [`EntryMeta`] is the companion
//! record the refresh scheduler reads to decide whether a value has passed
//! its half-life.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A value held by the local tier
#[derive(Clone)]
pub struct CacheEntry {
    /// Serialized payload (same bytes the shared tier stores)
    data: Bytes,
    /// Time-to-live (zero = no expiry)
    ttl: Duration,
    /// When the entry was written to this tier
    inserted_at: Instant,
    /// Monotonic insertion sequence, lower = older
    sequence: u64,
}

impl CacheEntry {
    /// Create a new entry
    pub fn new(data: Bytes, ttl: Duration, sequence: u64) -> Self {
        Self {
            data,
            ttl,
            inserted_at: Instant::now(),
            sequence,
        }
    }

    /// Payload bytes
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Configured TTL
    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insertion sequence number
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Age since insertion
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    /// Check if entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        !self.ttl.is_zero() && self.inserted_at.elapsed() >= self.ttl
    }

    /// Time left before expiry, `None` when the entry never expires
    pub fn remaining_ttl(&self) -> Option<Duration> {
        if self.ttl.is_zero() {
            return None;
        }
        Some(self.ttl.saturating_sub(self.inserted_at.elapsed()))
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.size())
            .field("ttl", &self.ttl)
            .field("sequence", &self.sequence)
            .field("expired", &self.is_expired())
            .finish()
    }
}

/// Creation metadata stored alongside refreshable values under `{key}:meta`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Wall-clock time the value was computed
    pub created_at: DateTime<Utc>,
    /// TTL the value was written with, in milliseconds
    pub ttl_ms: u64,
}

impl EntryMeta {
    /// Metadata for a value computed right now
    pub fn now(ttl: Duration) -> Self {
        Self::created_at(Utc::now(), ttl)
    }

    /// Metadata for a value computed at `created_at`
    pub fn created_at(created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            created_at,
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// Age relative to `now`, clamped at zero for clock skew
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    /// TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new(Bytes::from_static(b"data"), Duration::ZERO, 1);
        assert!(!entry.is_expired());
        assert_eq!(entry.remaining_ttl(), None);
        assert_eq!(entry.size(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiry() {
        let entry = CacheEntry::new(Bytes::from_static(b"data"), Duration::from_secs(10), 7);
        assert!(!entry.is_expired());
        assert_eq!(entry.sequence(), 7);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(entry.remaining_ttl(), Some(Duration::from_secs(6)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl(), Some(Duration::ZERO));
    }

    #[test]
    fn test_entry_meta_age() {
        let now = Utc::now();
        let meta = EntryMeta::created_at(
            now - chrono::Duration::milliseconds(350_000),
            Duration::from_millis(600_000),
        );
        assert_eq!(meta.age_at(now), Duration::from_millis(350_000));
        assert_eq!(meta.ttl(), Duration::from_millis(600_000));
    }

    #[test]
    fn test_entry_meta_future_timestamp_clamps() {
        let now = Utc::now();
        let meta = EntryMeta::created_at(now + chrono::Duration::seconds(5), Duration::ZERO);
        assert_eq!(meta.age_at(now), Duration::ZERO);
    }

    #[test]
    fn test_entry_meta_serde() {
        let meta = EntryMeta::now(Duration::from_secs(60));
        let json = serde_json::to_string(&meta).unwrap();
        let back: EntryMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }
}
