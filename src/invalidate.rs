//! Whole-cache invalidation.
//!
//! [`CacheInvalidator::invalidate_all()`] clears every in-memory tier
//! synchronously, then replaces the persistent tier. Memory is empty before
//! the store delete is awaited, so a read racing the invalidation sees
//! either the old state or the new one.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, error, info};

use crate::Result;
use crate::fetch::FetchCoordinator;
use crate::telemetry;

/// An in-memory cache kept outside the fetch coordinator that must be
/// emptied whenever the dataset is replaced.
pub trait LocalCache: Send + Sync {
    /// Label for logs.
    fn name(&self) -> &str;

    fn clear(&self);
}

/// Ready-made [`LocalCache`] for per-entity detail maps.
///
/// ```rust
/// # use freshet::KeyedCache;
/// let details: KeyedCache<String> = KeyedCache::new("cik-detail", 1_000);
/// details.insert("0001067983", "Berkshire Hathaway".to_string());
/// assert_eq!(details.get("0001067983").as_deref(), Some("Berkshire Hathaway"));
/// ```
pub struct KeyedCache<V> {
    name: String,
    entries: Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> KeyedCache<V> {
    pub fn new(name: impl Into<String>, max_entries: u64) -> Self {
        Self {
            name: name.into(),
            entries: Cache::new(max_entries),
        }
    }

    /// Cache whose entries also expire after `ttl`.
    pub fn with_ttl(name: impl Into<String>, max_entries: u64, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            entries: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) {
        self.entries.invalidate(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl<V: Clone + Send + Sync + 'static> LocalCache for KeyedCache<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear(&self) {
        self.entries.invalidate_all();
    }
}

/// Clears the memory tier, every registered local cache, and the
/// persistent store.
pub struct CacheInvalidator {
    fetch: FetchCoordinator,
    local_caches: Vec<Arc<dyn LocalCache>>,
}

impl CacheInvalidator {
    pub fn new(fetch: FetchCoordinator) -> Self {
        Self {
            fetch,
            local_caches: Vec::new(),
        }
    }

    /// Register a cache to clear on every invalidation.
    pub fn with_local_cache(mut self, cache: Arc<dyn LocalCache>) -> Self {
        self.local_caches.push(cache);
        self
    }

    pub fn local_caches(&self) -> impl Iterator<Item = &str> {
        self.local_caches.iter().map(|c| c.name())
    }

    /// Invalidate everything.
    ///
    /// Safe to call while fetches are running: their results still reach
    /// their callers but are not written into the fresh tiers. Calling it
    /// twice in a row is harmless; the second call finds the store clean
    /// and skips the delete.
    ///
    /// Fails only with `InvalidationFailed`, after which the persistent
    /// tier stays disabled for the session and reads continue memory-only.
    pub async fn invalidate_all(&self) -> Result<()> {
        let window = self.fetch.begin_invalidation();
        for cache in &self.local_caches {
            cache.clear();
            debug!(cache = cache.name(), "local cache cleared");
        }

        let store = self.fetch.store();
        let result = store.invalidate_all().await;
        drop(window);

        match result {
            Ok(()) => {
                metrics::counter!(telemetry::INVALIDATIONS_TOTAL, "status" => "ok").increment(1);
                info!(
                    database = store.database(),
                    generation = store.generation(),
                    local_caches = self.local_caches.len(),
                    "all cache tiers invalidated"
                );
                Ok(())
            }
            Err(e) => {
                metrics::counter!(telemetry::INVALIDATIONS_TOTAL, "status" => "failed")
                    .increment(1);
                error!(error = %e, "cache invalidation incomplete, continuing memory-only");
                Err(e)
            }
        }
    }
}
