//! Builder for configuring cache runtimes

use std::collections::HashSet;
use std::sync::Arc;

use super::CacheRuntime;
use crate::config::Config;
use crate::fence::{FileVersionStore, VersionFence, VersionStore};
use crate::fetch::{FetchCoordinator, MemoryConfig};
use crate::invalidate::{CacheInvalidator, LocalCache};
use crate::monitor::{FreshnessConfig, FreshnessMonitor};
use crate::store::{FsEngine, PersistentStore, StorageEngine, StoreConfig};
use crate::sync::{CollectionSpec, CollectionSyncEngine};
use crate::traits::DataSource;
use crate::{CacheError, Result};

/// Main entry point for creating cache runtimes.
pub struct Freshet;

impl Freshet {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> FreshetBuilder {
        FreshetBuilder::new()
    }
}

/// Builder for configuring cache runtimes.
pub struct FreshetBuilder {
    source: Option<Arc<dyn DataSource>>,
    engine: Option<Arc<dyn StorageEngine>>,
    version_store: Option<Arc<dyn VersionStore>>,
    store_config: StoreConfig,
    memory_config: MemoryConfig,
    freshness: FreshnessConfig,
    collections: Vec<CollectionSpec>,
    detail_datasets: HashSet<String>,
    local_caches: Vec<Arc<dyn LocalCache>>,
}

impl Default for FreshetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FreshetBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            engine: None,
            version_store: None,
            store_config: StoreConfig::default(),
            memory_config: MemoryConfig::default(),
            freshness: FreshnessConfig::default(),
            collections: Vec::new(),
            detail_datasets: HashSet::new(),
            local_caches: Vec::new(),
        }
    }

    /// Apply a loaded [`Config`].
    ///
    /// With the `http` feature, `source.base_url` installs an
    /// [`HttpDataSource`](crate::source::HttpDataSource).
    pub fn config(mut self, config: &Config) -> Result<Self> {
        #[cfg(feature = "http")]
        if let Some(base_url) = &config.source.base_url {
            use crate::source::{HttpDataSource, HttpSourceConfig};
            let http = HttpSourceConfig::new(base_url.clone())
                .timeout(std::time::Duration::from_secs(config.source.timeout_secs));
            self.source = Some(Arc::new(HttpDataSource::with_config(http)?));
        }
        self.engine = Some(config.store.engine());
        self.store_config = config.store.settings.clone();
        self.memory_config = config.memory.clone();
        self.freshness = config.freshness.clone();
        self.collections.extend(config.collections.iter().cloned());
        self.detail_datasets
            .extend(config.detail_datasets.iter().cloned());
        Ok(self)
    }

    /// Set the remote source of truth. Required.
    pub fn data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Storage engine for the persistent tier (default: [`FsEngine`] under
    /// the user cache directory).
    pub fn engine(mut self, engine: Arc<dyn StorageEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn store_config(mut self, config: StoreConfig) -> Self {
        self.store_config = config;
        self
    }

    pub fn memory_config(mut self, config: MemoryConfig) -> Self {
        self.memory_config = config;
        self
    }

    /// Where the data version lives (default: a JSON file next to the
    /// persistent tier, see [`FileVersionStore::default_path()`]).
    pub fn version_store(mut self, store: Arc<dyn VersionStore>) -> Self {
        self.version_store = Some(store);
        self
    }

    pub fn freshness(mut self, config: FreshnessConfig) -> Self {
        self.freshness = config;
        self
    }

    /// Register a bulk-loaded collection.
    pub fn collection(mut self, spec: CollectionSpec) -> Self {
        self.collections.push(spec);
        self
    }

    /// Route `dataset` to the entity detail table.
    pub fn detail_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.detail_datasets.insert(dataset.into());
        self
    }

    /// Register an external cache cleared on every invalidation.
    pub fn local_cache(mut self, cache: Arc<dyn LocalCache>) -> Self {
        self.local_caches.push(cache);
        self
    }

    /// Build the runtime.
    ///
    /// Does no I/O; the persistent tier opens on first use.
    pub fn build(self) -> Result<CacheRuntime> {
        let source = self.source.ok_or_else(|| {
            CacheError::Configuration("a data source is required".to_string())
        })?;

        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(FsEngine::new(FsEngine::default_root())));
        let store = Arc::new(PersistentStore::new(engine, self.store_config));

        let fetch = FetchCoordinator::with_detail_datasets(
            Arc::clone(&source),
            store,
            &self.memory_config,
            self.detail_datasets,
        );

        let sync = Arc::new(CollectionSyncEngine::new(fetch.clone(), self.collections));
        for name in &self.freshness.repopulate {
            if sync.sync_state(name).is_none() {
                return Err(CacheError::UnknownCollection(name.clone()));
            }
        }

        let mut invalidator = CacheInvalidator::new(fetch.clone())
            .with_local_cache(Arc::clone(&sync) as Arc<dyn LocalCache>);
        for cache in self.local_caches {
            invalidator = invalidator.with_local_cache(cache);
        }
        let invalidator = Arc::new(invalidator);

        let versions = self.version_store.unwrap_or_else(|| {
            let path = self
                .freshness
                .version_path
                .clone()
                .unwrap_or_else(FileVersionStore::default_path);
            Arc::new(FileVersionStore::new(path))
        });

        let monitor = FreshnessMonitor::new(
            VersionFence::new(versions),
            source,
            Arc::clone(&invalidator),
            self.freshness,
        )
        .with_sync_engine(Arc::clone(&sync));

        Ok(CacheRuntime::new(fetch, sync, invalidator, Arc::new(monitor)))
    }
}
