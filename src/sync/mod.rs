//! Bulk loading of large reference collections.
//!
//! A collection is loaded either eagerly (one resource holding every row)
//! or by sweeping cursor-paginated pages until the server stops returning a
//! cursor. The whole collection is cached as a single JSON array under
//! [`CacheKey::collection()`], so sweeps share the fetch coordinator's tiers
//! and in-flight de-duplication: concurrent preloads of one collection run
//! a single sweep.

mod pages;

pub use pages::{PageStream, pages};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::fetch::FetchCoordinator;
use crate::invalidate::LocalCache;
use crate::store::{Table, now_ms};
use crate::telemetry;
use crate::types::{CacheKey, Fetched, SyncState};
use crate::{CacheError, Result};

/// Default page size for paginated sweeps.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// How a collection is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LoadStrategy {
    /// One resource returns the whole collection.
    Eager { resource: String },
    /// Pages of `page_size` rows, followed by cursor.
    Paginated {
        #[serde(default = "default_page_size")]
        page_size: usize,
    },
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// A named collection and its load strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(flatten)]
    pub strategy: LoadStrategy,
}

impl CollectionSpec {
    /// Collection served whole by `resource`.
    pub fn eager(name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: LoadStrategy::Eager {
                resource: resource.into(),
            },
        }
    }

    pub fn paginated(name: impl Into<String>, page_size: usize) -> Self {
        Self {
            name: name.into(),
            strategy: LoadStrategy::Paginated { page_size },
        }
    }
}

/// Completion marker persisted for each fully synced collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMarker {
    pub total_rows: usize,
    pub completed_at_ms: u64,
}

#[derive(Default)]
struct States {
    by_name: HashMap<String, SyncState>,
    /// Bumped by every reset; sweeps finishing across a reset do not
    /// mark their collection complete.
    resets: u64,
}

/// Tracks and drives collection loads.
pub struct CollectionSyncEngine {
    fetch: FetchCoordinator,
    specs: HashMap<String, CollectionSpec>,
    states: Arc<Mutex<States>>,
}

impl CollectionSyncEngine {
    pub fn new(fetch: FetchCoordinator, specs: impl IntoIterator<Item = CollectionSpec>) -> Self {
        let specs: HashMap<_, _> = specs.into_iter().map(|s| (s.name.clone(), s)).collect();
        let by_name = specs
            .keys()
            .map(|name| (name.clone(), SyncState::Idle))
            .collect();
        Self {
            fetch,
            specs,
            states: Arc::new(Mutex::new(States { by_name, resets: 0 })),
        }
    }

    fn states(&self) -> MutexGuard<'_, States> {
        lock(&self.states)
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionSpec> {
        self.specs.values()
    }

    /// Current state of `name`, `None` if it is not configured.
    pub fn sync_state(&self, name: &str) -> Option<SyncState> {
        self.states().by_name.get(name).cloned()
    }

    /// Load `name` into the cache tiers. A no-op once complete.
    pub async fn preload(&self, name: &str) -> Result<()> {
        if self.sync_state(name).is_some_and(|s| s.is_complete()) {
            debug!(collection = name, "already synced");
            return Ok(());
        }
        self.load(name).await.map(|_| ())
    }

    /// Every row of `name`, loading it first if needed.
    pub async fn collection(&self, name: &str) -> Result<Vec<Value>> {
        let fetched = self.load(name).await?;
        Ok(match fetched.value().as_ref() {
            Value::Array(rows) => rows.clone(),
            other => vec![other.clone()],
        })
    }

    /// Completion marker persisted for `name` by its last sweep.
    pub async fn last_synced(&self, name: &str) -> Option<SyncMarker> {
        let value = self
            .fetch
            .store()
            .get(Table::SyncBookkeeping, name)
            .await
            .ok()??;
        serde_json::from_value(value).ok()
    }

    async fn load(&self, name: &str) -> Result<Fetched> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| CacheError::UnknownCollection(name.to_string()))?
            .clone();
        let resets = {
            let mut states = self.states();
            let state = states.by_name.entry(name.to_string()).or_default();
            if matches!(state, SyncState::Idle) {
                *state = SyncState::Syncing { pages: 0, rows: 0 };
            }
            states.resets
        };
        let generation = self.fetch.store().generation();

        let key = CacheKey::collection(name);
        let loader = self.loader(spec);
        match self.fetch.fetch_with(&key, loader).await {
            Ok(fetched) => {
                let total_rows = row_count(fetched.value());
                if self.finish(name, resets, total_rows) {
                    self.record_marker(name, total_rows, generation).await;
                }
                Ok(fetched)
            }
            Err(e) => {
                let mut states = self.states();
                if states.resets == resets {
                    states.by_name.insert(name.to_string(), SyncState::Idle);
                }
                warn!(collection = name, error = %e, "collection sync failed");
                Err(e)
            }
        }
    }

    /// Mark `name` complete unless a reset happened since the load began.
    ///
    /// Returns whether this call completed it.
    fn finish(&self, name: &str, resets: u64, total_rows: usize) -> bool {
        let mut states = self.states();
        if states.resets != resets {
            debug!(collection = name, "sync finished across an invalidation, state left idle");
            return false;
        }
        let state = states.by_name.entry(name.to_string()).or_default();
        if state.is_complete() {
            return false;
        }
        *state = SyncState::complete(total_rows);
        info!(collection = name, total_rows, "collection synced");
        true
    }

    async fn record_marker(&self, name: &str, total_rows: usize, generation: u64) {
        let marker = SyncMarker {
            total_rows,
            completed_at_ms: now_ms(),
        };
        let value = match serde_json::to_value(&marker) {
            Ok(v) => v,
            Err(e) => {
                debug!(collection = name, error = %e, "sync marker not serializable");
                return;
            }
        };
        if let Err(e) = self
            .fetch
            .store()
            .put_fenced(Table::SyncBookkeeping, name, value, generation)
            .await
        {
            debug!(collection = name, error = %e, "sync marker not persisted");
        }
    }

    fn loader(
        &self,
        spec: CollectionSpec,
    ) -> impl FnOnce() -> futures_util::future::BoxFuture<'static, Result<Value>> + Send + 'static
    {
        let source = Arc::clone(self.fetch.source());
        let states = Arc::clone(&self.states);
        move || {
            async move {
                match spec.strategy {
                    LoadStrategy::Eager { resource } => {
                        source.fetch_resource(&CacheKey::new(resource)).await
                    }
                    LoadStrategy::Paginated { page_size } => {
                        sweep(source, &spec.name, page_size, &states).await
                    }
                }
            }
            .boxed()
        }
    }
}

/// Collect every page of `collection` into one array, reporting progress.
async fn sweep(
    source: Arc<dyn crate::DataSource>,
    collection: &str,
    page_size: usize,
    states: &Mutex<States>,
) -> Result<Value> {
    let mut rows = Vec::new();
    let mut page_count = 0;
    let mut stream = pages(source, collection, page_size);
    while let Some(page) = stream.next().await {
        let page = page?;
        page_count += 1;
        rows.extend(page.items);
        metrics::counter!(telemetry::SYNC_PAGES_TOTAL, "collection" => collection.to_string())
            .increment(1);
        let mut states = lock(states);
        if let Some(state) = states.by_name.get_mut(collection) {
            if state.is_syncing() {
                *state = SyncState::Syncing {
                    pages: page_count,
                    rows: rows.len(),
                };
            }
        }
    }
    debug!(collection, pages = page_count, rows = rows.len(), "pagination sweep done");
    Ok(Value::Array(rows))
}

fn row_count(value: &Value) -> usize {
    match value {
        Value::Array(rows) => rows.len(),
        Value::Null => 0,
        _ => 1,
    }
}

fn lock(states: &Mutex<States>) -> MutexGuard<'_, States> {
    states.lock().unwrap_or_else(|p| p.into_inner())
}

impl LocalCache for CollectionSyncEngine {
    fn name(&self) -> &str {
        "collection-sync"
    }

    /// Reset every collection to idle.
    fn clear(&self) {
        let mut states = self.states();
        states.resets += 1;
        for state in states.by_name.values_mut() {
            *state = SyncState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryConfig;
    use crate::store::{MemoryEngine, PersistentStore, StoreConfig};
    use crate::testing::MockSource;
    use crate::types::Page;
    use serde_json::json;

    fn engine(source: Arc<MockSource>, specs: Vec<CollectionSpec>) -> CollectionSyncEngine {
        let store = Arc::new(PersistentStore::new(
            Arc::new(MemoryEngine::new()),
            StoreConfig::default(),
        ));
        let fetch = FetchCoordinator::new(source, store, &MemoryConfig::default());
        CollectionSyncEngine::new(fetch, specs)
    }

    #[tokio::test]
    async fn eager_collection_loads_once() {
        let source = Arc::new(MockSource::new().with_resource("assets", json!(["a", "b"])));
        let sync = engine(source.clone(), vec![CollectionSpec::eager("assets", "assets")]);
        assert_eq!(sync.sync_state("assets"), Some(SyncState::Idle));

        sync.preload("assets").await.unwrap();
        sync.preload("assets").await.unwrap();

        assert_eq!(source.resource_calls(), 1);
        assert!(matches!(
            sync.sync_state("assets"),
            Some(SyncState::Complete { total_rows: 2, .. })
        ));
    }

    #[tokio::test]
    async fn unknown_collection_is_an_error() {
        let sync = engine(Arc::new(MockSource::new()), vec![]);
        assert!(matches!(
            sync.preload("nope").await,
            Err(CacheError::UnknownCollection(_))
        ));
        assert_eq!(sync.sync_state("nope"), None);
    }

    #[tokio::test]
    async fn failed_sweep_returns_to_idle() {
        let source = Arc::new(MockSource::new().with_pages(
            "searches",
            vec![Page::new(vec![json!(1)], Some("1"))],
        ));
        let sync = engine(source, vec![CollectionSpec::paginated("searches", 10)]);

        assert!(sync.preload("searches").await.is_err());
        assert_eq!(sync.sync_state("searches"), Some(SyncState::Idle));
    }

    #[tokio::test]
    async fn clear_resets_to_idle() {
        let source = Arc::new(MockSource::new().with_resource("assets", json!([])));
        let sync = engine(source, vec![CollectionSpec::eager("assets", "assets")]);
        sync.preload("assets").await.unwrap();

        LocalCache::clear(&sync);

        assert_eq!(sync.sync_state("assets"), Some(SyncState::Idle));
    }

    #[test]
    fn spec_from_toml() {
        let spec: CollectionSpec =
            toml::from_str("name = \"searches\"\nstrategy = \"paginated\"").unwrap();
        assert_eq!(spec, CollectionSpec::paginated("searches", DEFAULT_PAGE_SIZE));
    }
}
