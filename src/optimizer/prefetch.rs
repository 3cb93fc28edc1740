//! Prefetch Strategies
//!
//! A strategy knows which keys a caller is about to need (`key_generator`)
//! and how to load them in bulk (`data_loader`). The optimizer runs
//! strategies on demand through `warm`, and from the `preload` rule when a
//! hot pattern carries one of the strategy's dependency tags.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;

/// Inputs available to key generators
#[derive(Debug, Clone, Default)]
pub struct PrefetchContext {
    pub sprint_ids: Vec<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    /// Tags of the pattern that triggered a preload; empty for explicit warms
    pub tags: BTreeSet<String>,
}

impl PrefetchContext {
    pub fn for_sprints<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sprint_ids: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_repository(mut self, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self.repo = Some(repo.into());
        self
    }
}

pub type KeyGenerator = Arc<dyn Fn(&PrefetchContext) -> Vec<String> + Send + Sync>;

pub type DataLoader =
    Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, Result<Vec<(String, serde_json::Value)>>> + Send + Sync>;

/// A named key generator and bulk loader
#[derive(Clone)]
pub struct PrefetchStrategy {
    pub name: String,
    /// Higher runs first
    pub priority: u32,
    /// Pattern tags that make this strategy relevant to `preload`
    pub dependencies: BTreeSet<String>,
    key_generator: KeyGenerator,
    data_loader: DataLoader,
}

impl PrefetchStrategy {
    pub fn new<G, L, Fut>(name: impl Into<String>, priority: u32, key_generator: G, data_loader: L) -> Self
    where
        G: Fn(&PrefetchContext) -> Vec<String> + Send + Sync + 'static,
        L: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<(String, serde_json::Value)>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            dependencies: BTreeSet::new(),
            key_generator: Arc::new(key_generator),
            data_loader: Arc::new(
                move |keys: Vec<String>| -> BoxFuture<'static, Result<Vec<(String, serde_json::Value)>>> {
                    Box::pin(data_loader(keys))
                },
            ),
        }
    }

    pub fn depends_on<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn generate_keys(&self, context: &PrefetchContext) -> Vec<String> {
        (self.key_generator)(context)
    }

    pub async fn load(&self, keys: Vec<String>) -> Result<Vec<(String, serde_json::Value)>> {
        (self.data_loader)(keys).await
    }

    /// True if any of `tags` is a dependency
    pub fn is_relevant(&self, tags: &BTreeSet<String>) -> bool {
        !self.dependencies.is_disjoint(tags)
    }
}

impl fmt::Debug for PrefetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchStrategy")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
