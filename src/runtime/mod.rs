//! The owned context object a UI layer talks to.

mod builder;

pub use builder::{Freshet, FreshetBuilder};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Result;
use crate::fetch::FetchCoordinator;
use crate::invalidate::CacheInvalidator;
use crate::monitor::FreshnessMonitor;
use crate::store::PersistentStore;
use crate::sync::{CollectionSyncEngine, SyncMarker};
use crate::types::{CacheKey, Fetched, ReadState, SyncState};

/// Every tier, the sync engine and the freshness monitor behind one handle.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CacheRuntime {
    fetch: FetchCoordinator,
    sync: Arc<CollectionSyncEngine>,
    invalidator: Arc<CacheInvalidator>,
    monitor: Arc<FreshnessMonitor>,
}

impl CacheRuntime {
    pub(crate) fn new(
        fetch: FetchCoordinator,
        sync: Arc<CollectionSyncEngine>,
        invalidator: Arc<CacheInvalidator>,
        monitor: Arc<FreshnessMonitor>,
    ) -> Self {
        Self {
            fetch,
            sync,
            invalidator,
            monitor,
        }
    }

    /// Non-blocking read. Starts a background fetch on a miss.
    pub fn read(&self, key: &CacheKey) -> ReadState {
        self.fetch.read(key)
    }

    pub async fn fetch(&self, key: &CacheKey) -> Result<Fetched> {
        self.fetch.fetch(key).await
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Arc<Value>> {
        self.fetch.get(key).await
    }

    pub async fn fetch_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<T> {
        self.fetch.fetch_as(key).await
    }

    pub fn prefetch(&self, key: &CacheKey) {
        self.fetch.prefetch(key)
    }

    /// Drop one key from every tier.
    pub async fn invalidate_key(&self, key: &CacheKey) -> Result<()> {
        self.fetch.invalidate_key(key).await
    }

    pub async fn preload(&self, collection: &str) -> Result<()> {
        self.sync.preload(collection).await
    }

    pub async fn collection(&self, name: &str) -> Result<Vec<Value>> {
        self.sync.collection(name).await
    }

    pub fn sync_state(&self, name: &str) -> Option<SyncState> {
        self.sync.sync_state(name)
    }

    pub async fn last_synced(&self, name: &str) -> Option<SyncMarker> {
        self.sync.last_synced(name).await
    }

    /// Manual "clear cache": invalidate everything regardless of the
    /// server's version.
    pub async fn invalidate_now(&self) -> Result<bool> {
        self.monitor.invalidate_now().await
    }

    /// Startup freshness check; see
    /// [`FreshnessMonitor::initialize_with_freshness_check()`].
    pub async fn initialize_with_freshness_check(&self) -> bool {
        self.monitor.initialize_with_freshness_check().await
    }

    pub async fn check_on_focus(&self) -> bool {
        self.monitor.check_on_focus().await
    }

    pub fn monitor(&self) -> &FreshnessMonitor {
        &self.monitor
    }

    pub fn sync_engine(&self) -> &CollectionSyncEngine {
        &self.sync
    }

    pub fn invalidator(&self) -> &CacheInvalidator {
        &self.invalidator
    }

    pub fn fetch_coordinator(&self) -> &FetchCoordinator {
        &self.fetch
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        self.fetch.store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::MemoryVersionStore;
    use crate::store::MemoryEngine;
    use crate::sync::CollectionSpec;
    use crate::testing::MockSource;
    use serde_json::json;

    fn runtime(source: Arc<MockSource>) -> CacheRuntime {
        Freshet::builder()
            .data_source(source)
            .engine(Arc::new(MemoryEngine::new()))
            .version_store(Arc::new(MemoryVersionStore::with_version("v1")))
            .collection(CollectionSpec::eager("assets", "assets"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn manual_invalidation_resets_collections() {
        let source = Arc::new(
            MockSource::new()
                .with_resource("assets", json!(["AAPL", "MSFT"]))
                .with_token("v1"),
        );
        let rt = runtime(source.clone());

        assert_eq!(rt.collection("assets").await.unwrap().len(), 2);
        assert!(rt.sync_state("assets").is_some_and(|s| s.is_complete()));

        assert!(rt.invalidate_now().await.unwrap());
        assert_eq!(rt.sync_state("assets"), Some(SyncState::Idle));

        rt.preload("assets").await.unwrap();
        assert_eq!(source.resource_calls(), 2);
    }
}
