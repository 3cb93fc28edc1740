//! Lifecycle-Aware TTL Policy
//!
//! Sprint-scoped data is cached for as long as it is likely to stay valid:
//! an active sprint changes by the minute, a closed one never changes
//! again. The sprint's lifecycle state is itself cached so resolving a TTL
//! normally costs one local lookup.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::keys::sprint_state_key;
use crate::cache::CacheManager;
use crate::domain::{SprintState, SprintStateSource};

/// TTL per lifecycle state
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub active: Duration,
    pub closed: Duration,
    pub future: Duration,
    /// Unknown state or failed lookup
    pub fallback: Duration,
    /// How long a looked-up state is cached
    pub state_cache_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            active: Duration::from_secs(5 * 60),
            closed: Duration::from_secs(30 * 24 * 60 * 60),
            future: Duration::from_secs(15 * 60),
            fallback: Duration::from_secs(10 * 60),
            state_cache_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl TtlPolicy {
    /// TTL for a known (or unknown) state
    pub fn ttl_for(&self, state: Option<SprintState>) -> Duration {
        match state {
            Some(SprintState::Active) => self.active,
            Some(SprintState::Closed) => self.closed,
            Some(SprintState::Future) => self.future,
            Some(SprintState::Unknown) | None => self.fallback,
        }
    }
}

/// Resolves sprint-scoped TTLs from the sprint's lifecycle state
pub struct TtlResolver {
    cache: Arc<CacheManager>,
    source: Arc<dyn SprintStateSource>,
    policy: TtlPolicy,
}

impl TtlResolver {
    pub fn new(cache: Arc<CacheManager>, source: Arc<dyn SprintStateSource>) -> Self {
        Self::with_policy(cache, source, TtlPolicy::default())
    }

    pub fn with_policy(
        cache: Arc<CacheManager>,
        source: Arc<dyn SprintStateSource>,
        policy: TtlPolicy,
    ) -> Self {
        Self {
            cache,
            source,
            policy,
        }
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Lifecycle state, from cache when possible.
    ///
    /// A state the tracker does not know, or a failed lookup, is not
    /// cached so the next call asks again.
    pub async fn sprint_state(&self, sprint_id: &str) -> Option<SprintState> {
        let key = sprint_state_key(sprint_id);
        if let Some(state) = self.cache.get::<SprintState>(&key).await {
            return Some(state);
        }

        match self.source.sprint_state(sprint_id).await {
            Ok(Some(state)) => {
                self.cache
                    .set(&key, &state, Some(self.policy.state_cache_ttl))
                    .await;
                Some(state)
            }
            Ok(None) => {
                debug!(sprint_id, "Sprint unknown to tracker");
                None
            }
            Err(e) => {
                warn!(sprint_id, error = %e, "Sprint state lookup failed, using fallback TTL");
                None
            }
        }
    }

    /// TTL for data scoped to `sprint_id`
    pub async fn resolve_ttl(&self, sprint_id: &str) -> Duration {
        let state = self.sprint_state(sprint_id).await;
        let ttl = self.policy.ttl_for(state);
        debug!(sprint_id, state = ?state, ttl_secs = ttl.as_secs(), "Resolved sprint TTL");
        ttl
    }
}
