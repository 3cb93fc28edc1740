//! Stale-While-Revalidate Refresh
//!
//! Refreshable values are written together with an [`EntryMeta`] companion
//! under `{key}:meta`. Callers keep serving the cached value and ask the
//! scheduler whether it is due: once a value is older than half its TTL the
//! refresh callback runs on a detached task and writes the new value (and
//! fresh metadata) back under the same key.
//!
//! Refresh failures never reach the caller that triggered them. They are
//! logged and published on the scheduler's failure channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::cache::keys::meta_key;
use crate::cache::{CacheManager, EntryMeta};
use crate::error::Result;

/// Refresh scheduler configuration
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Allow at most one in-flight refresh per key
    pub single_flight: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { single_flight: true }
    }
}

/// A refresh that did not complete
#[derive(Debug, Clone)]
pub struct RefreshFailure {
    pub key: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// What [`RefreshScheduler::schedule_refresh`] decided
#[derive(Debug)]
pub enum RefreshDecision {
    /// A refresh task was spawned
    Scheduled(JoinHandle<()>),
    /// The value is younger than half its TTL
    Fresh { age: Duration },
    /// No metadata; the value was not written as refreshable
    NoMetadata,
    /// Another refresh for this key is still running
    AlreadyInFlight,
}

impl RefreshDecision {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, RefreshDecision::Scheduled(_))
    }
}

/// Removes the key from the in-flight set when the task ends, even if the
/// refresh callback panics.
struct InFlightGuard {
    in_flight: Arc<DashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Spawns background refreshes for values past their half-life
pub struct RefreshScheduler {
    cache: Arc<CacheManager>,
    config: RefreshConfig,
    in_flight: Arc<DashSet<String>>,
    failures: mpsc::UnboundedSender<RefreshFailure>,
}

impl RefreshScheduler {
    /// Create a scheduler and the receiving end of its failure channel
    pub fn new(
        cache: Arc<CacheManager>,
        config: RefreshConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RefreshFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            cache,
            config,
            in_flight: Arc::new(DashSet::new()),
            failures: tx,
        };
        (scheduler, rx)
    }

    /// Write a refreshable value and its metadata
    pub async fn set_with_meta<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        write_with_meta(&self.cache, key, value, ttl).await;
    }

    /// Keys with a refresh currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Refresh `key` in the background if it is past half its TTL.
    pub async fn schedule_refresh<T, F, Fut>(
        &self,
        key: &str,
        refresh_fn: F,
        ttl: Duration,
    ) -> RefreshDecision
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let Some(meta) = self.cache.get::<EntryMeta>(&meta_key(key)).await else {
            debug!(key, "No refresh metadata, skipping");
            return RefreshDecision::NoMetadata;
        };

        let age = meta.age_at(Utc::now());
        if age <= ttl / 2 {
            return RefreshDecision::Fresh { age };
        }

        let guard = if self.config.single_flight {
            if !self.in_flight.insert(key.to_string()) {
                debug!(key, "Refresh already in flight");
                return RefreshDecision::AlreadyInFlight;
            }
            Some(InFlightGuard {
                in_flight: self.in_flight.clone(),
                key: key.to_string(),
            })
        } else {
            None
        };

        let cache = self.cache.clone();
        let failures = self.failures.clone();
        let key = key.to_string();
        debug!(key = %key, age_secs = age.as_secs(), "Scheduling background refresh");

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match refresh_fn().await {
                Ok(value) => {
                    write_with_meta(&cache, &key, &value, ttl).await;
                    debug!(key = %key, "Background refresh complete");
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Background refresh failed");
                    let _ = failures.send(RefreshFailure {
                        key,
                        error: e.to_string(),
                        at: Utc::now(),
                    });
                }
            }
        });

        RefreshDecision::Scheduled(handle)
    }
}

async fn write_with_meta<T: Serialize + ?Sized>(
    cache: &CacheManager,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    cache.set(key, value, Some(ttl)).await;
    cache
        .set(&meta_key(key), &EntryMeta::now(ttl), Some(ttl))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(600);

    fn scheduler() -> (
        RefreshScheduler,
        mpsc::UnboundedReceiver<RefreshFailure>,
        Arc<CacheManager>,
    ) {
        let cache = Arc::new(CacheManager::in_memory());
        let (scheduler, rx) = RefreshScheduler::new(cache.clone(), RefreshConfig::default());
        (scheduler, rx, cache)
    }

    async fn write_aged(cache: &CacheManager, key: &str, value: &str, age_secs: i64) {
        cache.set(key, value, Some(TTL)).await;
        let created = Utc::now() - chrono::Duration::seconds(age_secs);
        cache
            .set(&meta_key(key), &EntryMeta::created_at(created, TTL), Some(TTL))
            .await;
    }

    #[tokio::test]
    async fn test_no_metadata_no_refresh() {
        let (scheduler, _rx, cache) = scheduler();
        cache.set("report:1", "v1", Some(TTL)).await;

        let decision = scheduler
            .schedule_refresh("report:1", || async { Ok("v2") }, TTL)
            .await;
        assert_matches!(decision, RefreshDecision::NoMetadata);
    }

    #[tokio::test]
    async fn test_fresh_value_not_refreshed() {
        let (scheduler, _rx, _cache) = scheduler();
        scheduler.set_with_meta("report:1", "v1", TTL).await;

        let decision = scheduler
            .schedule_refresh("report:1", || async { Ok("v2") }, TTL)
            .await;
        assert_matches!(decision, RefreshDecision::Fresh { .. });
    }

    #[tokio::test]
    async fn test_stale_value_refreshed_in_background() {
        let (scheduler, _rx, cache) = scheduler();
        write_aged(&cache, "report:1", "v1", 400).await;

        let decision = scheduler
            .schedule_refresh("report:1", || async { Ok("v2".to_string()) }, TTL)
            .await;
        match decision {
            RefreshDecision::Scheduled(handle) => handle.await.unwrap(),
            other => panic!("expected a scheduled refresh, got {other:?}"),
        }

        let value: Option<String> = cache.get("report:1").await;
        assert_eq!(value.as_deref(), Some("v2"));

        let meta: EntryMeta = cache.get(&meta_key("report:1")).await.unwrap();
        assert!(meta.age_at(Utc::now()) < Duration::from_secs(60));
        assert_eq!(meta.ttl(), TTL);
    }

    #[tokio::test]
    async fn test_failure_reported_on_channel() {
        let (scheduler, mut rx, cache) = scheduler();
        write_aged(&cache, "report:2", "v1", 500).await;

        let decision = scheduler
            .schedule_refresh(
                "report:2",
                || async { Err::<String, _>(CacheError::Source("tracker down".into())) },
                TTL,
            )
            .await;
        match decision {
            RefreshDecision::Scheduled(handle) => handle.await.unwrap(),
            other => panic!("expected a scheduled refresh, got {other:?}"),
        }

        let failure = rx.recv().await.unwrap();
        assert_eq!(failure.key, "report:2");
        assert!(failure.error.contains("tracker down"));

        let value: Option<String> = cache.get("report:2").await;
        assert_eq!(value.as_deref(), Some("v1"));
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_single_flight_guard() {
        let (scheduler, _rx, cache) = scheduler();
        write_aged(&cache, "report:3", "v1", 400).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let first_calls = calls.clone();
        let first = scheduler
            .schedule_refresh(
                "report:3",
                move || async move {
                    first_calls.fetch_add(1, Ordering::SeqCst);
                    let _ = release_rx.await;
                    Ok("v2".to_string())
                },
                TTL,
            )
            .await;
        assert!(first.is_scheduled());

        let second_calls = calls.clone();
        let second = scheduler
            .schedule_refresh(
                "report:3",
                move || async move {
                    second_calls.fetch_add(1, Ordering::SeqCst);
                    Ok("v3".to_string())
                },
                TTL,
            )
            .await;
        assert_matches!(second, RefreshDecision::AlreadyInFlight);

        release_tx.send(()).unwrap();
        if let RefreshDecision::Scheduled(handle) = first {
            handle.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_guard_disabled_allows_concurrent_refreshes() {
        let cache = Arc::new(CacheManager::in_memory());
        let (scheduler, _rx) = RefreshScheduler::new(
            cache.clone(),
            RefreshConfig {
                single_flight: false,
            },
        );
        write_aged(&cache, "report:4", "v1", 400).await;

        let a = scheduler
            .schedule_refresh("report:4", || async { Ok("a") }, TTL)
            .await;
        let b = scheduler
            .schedule_refresh("report:4", || async { Ok("b") }, TTL)
            .await;
        assert!(a.is_scheduled());
        assert!(b.is_scheduled());
    }
}
