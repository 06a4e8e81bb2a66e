//! Tiered fetch coordination.
//!
//! [`FetchCoordinator`] answers reads from the memory tier, then from a fetch
//! already running for the same key, then from the persistent tier
//! (promoting the value into memory), and finally from the remote source.
//!
//! Each fetch beyond the memory tier runs in its own spawned task behind a
//! [`Shared`](futures_util::future::Shared) handle. Every caller awaits the
//! same handle, so N concurrent callers cause one remote call and see the
//! same value or the same error. A caller that stops waiting does not
//! cancel the fetch.
//!
//! # Invalidation fencing
//!
//! Every tier write is tagged with the epoch current when its fetch was
//! registered. Clearing the memory tier bumps the epoch under the same
//! lock that guards writes, so a fetch that started before an invalidation
//! can still answer its callers but never repopulates the cleared tiers.
//! Persistent writes are additionally fenced on the store generation.

mod inflight;
mod memory;

pub use memory::MemoryConfig;

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::store::{PersistentStore, Table};
use crate::telemetry;
use crate::traits::DataSource;
use crate::types::{CacheEntry, CacheKey, Fetched, ReadState, Source};
use crate::{CacheError, Result};

use inflight::{InFlight, InFlightGuard, SharedFetch};
use memory::MemoryTier;

struct Inner {
    memory: MemoryTier,
    epoch: Mutex<u64>,
    /// Invalidations between their memory clear and their store reopen.
    invalidating: AtomicUsize,
    inflight: InFlight,
    store: Arc<PersistentStore>,
    source: Arc<dyn DataSource>,
    detail_datasets: HashSet<String>,
}

/// De-duplicating, tier-aware fetcher. Cheap to clone.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

enum Lookup {
    Hit(CacheEntry),
    Absent,
    Pending { fetch: SharedFetch, joined: bool },
}

impl FetchCoordinator {
    pub fn new(
        source: Arc<dyn DataSource>,
        store: Arc<PersistentStore>,
        config: &MemoryConfig,
    ) -> Self {
        Self::with_detail_datasets(source, store, config, Vec::<String>::new())
    }

    /// Coordinator whose `detail_datasets` are persisted as entity detail
    /// rows (shorter max age) instead of generic query results.
    pub fn with_detail_datasets<I, S>(
        source: Arc<dyn DataSource>,
        store: Arc<PersistentStore>,
        config: &MemoryConfig,
        detail_datasets: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(Inner {
                memory: MemoryTier::new(config),
                epoch: Mutex::new(0),
                invalidating: AtomicUsize::new(0),
                inflight: InFlight::default(),
                store,
                source,
                detail_datasets: detail_datasets.into_iter().map(Into::into).collect(),
            }),
        }
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.inner.source
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.inner.store
    }

    /// Persistent table `key` is stored in.
    pub fn table_for(&self, key: &CacheKey) -> Table {
        if key.is_collection() {
            Table::Collections
        } else if self.inner.detail_datasets.contains(key.dataset()) {
            Table::EntityDetail
        } else {
            Table::QueryCache
        }
    }

    fn epoch(&self) -> MutexGuard<'_, u64> {
        self.inner.epoch.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Value for `key` from the first tier that has it.
    pub async fn fetch(&self, key: &CacheKey) -> Result<Fetched> {
        let loader = self.resource_loader(key);
        self.fetch_with(key, loader).await
    }

    /// Like [`fetch()`](Self::fetch), with `loader` standing in for the
    /// remote call. The loader only runs if no tier has the value and no
    /// fetch for `key` is already running.
    pub async fn fetch_with<F, Fut>(&self, key: &CacheKey, loader: F) -> Result<Fetched>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let started = Instant::now();
        match self.lookup(key, loader) {
            Lookup::Hit(entry) => {
                metrics::counter!(telemetry::TIER_HITS_TOTAL, "tier" => "memory").increment(1);
                Ok(Fetched {
                    entry: entry.served_from(Source::Memory),
                    elapsed: started.elapsed(),
                    joined: false,
                })
            }
            Lookup::Absent => Err(CacheError::NotFound(key.to_string())),
            Lookup::Pending { fetch, joined } => {
                if joined {
                    debug!(key = %key, "joining in-flight fetch");
                    metrics::counter!(telemetry::INFLIGHT_JOINS_TOTAL).increment(1);
                }
                let entry = fetch.await?;
                Ok(Fetched {
                    entry,
                    elapsed: started.elapsed(),
                    joined,
                })
            }
        }
    }

    /// Value only.
    pub async fn get(&self, key: &CacheKey) -> Result<Arc<Value>> {
        Ok(self.fetch(key).await?.entry.value)
    }

    /// Value deserialized into `T`.
    pub async fn fetch_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<T> {
        let value = self.get(key).await?;
        Ok(T::deserialize(value.as_ref())?)
    }

    /// Non-blocking read. Starts a background fetch when the value is not
    /// in memory yet. Must be called within a tokio runtime.
    pub fn read(&self, key: &CacheKey) -> ReadState {
        let loader = self.resource_loader(key);
        match self.lookup(key, loader) {
            Lookup::Hit(entry) => ReadState::Ready(entry.value),
            Lookup::Absent => ReadState::Absent,
            Lookup::Pending { .. } => ReadState::Pending,
        }
    }

    /// Warm the tiers for `key` without waiting.
    pub fn prefetch(&self, key: &CacheKey) {
        let _ = self.read(key);
    }

    /// Memory-tier entry for `key`, without fetching.
    pub fn cached(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.memory.get(key)
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inner.inflight.contains(key)
    }

    /// Number of fetches currently registered.
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Drop one key from every tier.
    ///
    /// A fetch for `key` already running still answers its callers but
    /// writes neither tier. A write-behind already past its memory check
    /// may still land in the persistent tier.
    pub async fn invalidate_key(&self, key: &CacheKey) -> Result<()> {
        {
            let _epoch = self.epoch();
            self.inner.memory.remove(key);
            self.inner.inflight.remove(key);
        }
        match self.inner.store.delete(self.table_for(key), &key.to_string()).await {
            Err(e) if e.is_store_failure() => {
                debug!(key = %key, error = %e, "persistent tier unavailable, memory entry dropped");
                Ok(())
            }
            other => other,
        }
    }

    /// Clear memory, negative cache and in-flight registrations, and fence
    /// off tier writes from fetches started before now.
    ///
    /// Until the returned window is dropped, new fetches skip the
    /// persistent tier.
    pub(crate) fn begin_invalidation(&self) -> InvalidationWindow {
        let mut epoch = self.epoch();
        self.inner.invalidating.fetch_add(1, Ordering::SeqCst);
        *epoch += 1;
        self.inner.memory.clear();
        self.inner.inflight.clear();
        debug!(epoch = *epoch, "memory tiers cleared");
        InvalidationWindow {
            inner: Arc::clone(&self.inner),
        }
    }

    fn resource_loader(
        &self,
        key: &CacheKey,
    ) -> impl FnOnce() -> futures_util::future::BoxFuture<'static, Result<Value>> + Send + 'static
    {
        let source = Arc::clone(&self.inner.source);
        let key = key.clone();
        move || async move { source.fetch_resource(&key).await }.boxed()
    }

    /// Synchronous part of every read: memory, negative cache, then join or
    /// register. Runs under the epoch lock so it never interleaves with a
    /// memory clear.
    fn lookup<F, Fut>(&self, key: &CacheKey, loader: F) -> Lookup
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let epoch = self.epoch();
        if let Some(entry) = self.inner.memory.get(key) {
            return Lookup::Hit(entry);
        }
        if self.inner.memory.is_absent(key) {
            return Lookup::Absent;
        }
        let (fetch, joined) = self
            .inner
            .inflight
            .join_or_start(key, |guard| self.spawn_fetch(key, *epoch, guard, loader));
        Lookup::Pending { fetch, joined }
    }

    fn spawn_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        epoch: u64,
        guard: InFlightGuard,
        loader: F,
    ) -> SharedFetch
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let this = self.clone();
        let key = key.clone();
        let generation = self.inner.store.generation();
        let task = tokio::spawn(async move {
            let registration = guard;
            this.resolve(key, epoch, generation, &registration, loader)
                .await
        });
        task.map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(CacheError::TaskFailed(e.to_string())),
        })
        .boxed()
        .shared()
    }

    async fn resolve<F, Fut>(
        &self,
        key: CacheKey,
        epoch: u64,
        generation: u64,
        registration: &InFlightGuard,
        loader: F,
    ) -> Result<CacheEntry>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let table = self.table_for(&key);
        let persisted_key = key.to_string();

        // mid-invalidation the persistent tier may still hold old data
        if self.inner.invalidating.load(Ordering::SeqCst) == 0 {
            match self.inner.store.get(table, &persisted_key).await {
                Ok(Some(value)) => {
                    debug!(key = %key, table = table.as_str(), "persistent tier hit");
                    metrics::counter!(telemetry::TIER_HITS_TOTAL, "tier" => "persistent")
                        .increment(1);
                    let entry = CacheEntry::new(value, Source::Persistent);
                    self.remember(&key, epoch, registration, &entry);
                    return Ok(entry);
                }
                Ok(None) => {}
                Err(e) => debug!(key = %key, error = %e, "persistent tier skipped"),
            }
        }

        match loader().await {
            Ok(value) => {
                metrics::counter!(telemetry::REMOTE_FETCHES_TOTAL, "status" => "ok").increment(1);
                metrics::counter!(telemetry::TIER_HITS_TOTAL, "tier" => "remote").increment(1);
                debug!(key = %key, source = self.inner.source.name(), "fetched from remote");
                let entry = CacheEntry::new(value, Source::Remote);
                if self.remember(&key, epoch, registration, &entry) {
                    self.persist(table, key.clone(), Arc::clone(&entry.value), generation);
                }
                Ok(entry)
            }
            Err(e) if e.is_not_found() => {
                metrics::counter!(telemetry::REMOTE_FETCHES_TOTAL, "status" => "not_found")
                    .increment(1);
                debug!(key = %key, "remote reports not found");
                self.remember_absent(&key, epoch, registration);
                Err(match e {
                    e @ CacheError::NotFound(_) => e,
                    other => CacheError::NotFound(other.to_string()),
                })
            }
            Err(e) => {
                metrics::counter!(telemetry::REMOTE_FETCHES_TOTAL, "status" => "error")
                    .increment(1);
                warn!(key = %key, error = %e, "remote fetch failed");
                Err(CacheError::fetch_failed(&key, e))
            }
        }
    }

    /// Insert into memory unless an invalidation happened since `epoch` or
    /// `key` itself was invalidated while the fetch ran.
    fn remember(
        &self,
        key: &CacheKey,
        epoch: u64,
        registration: &InFlightGuard,
        entry: &CacheEntry,
    ) -> bool {
        let current = self.epoch();
        if *current != epoch || !registration.is_current() {
            debug!(key = %key, "discarding result fetched before invalidation");
            return false;
        }
        self.inner.memory.insert(key.clone(), entry.clone());
        true
    }

    fn remember_absent(&self, key: &CacheKey, epoch: u64, registration: &InFlightGuard) {
        let current = self.epoch();
        if *current == epoch && registration.is_current() {
            self.inner.memory.mark_absent(key.clone());
        }
    }

    /// Write-behind to the persistent tier. Failures never reach callers.
    ///
    /// Skipped if `key` was dropped from memory in the meantime, so a
    /// per-key or full invalidation also cancels pending writes.
    fn persist(&self, table: Table, key: CacheKey, value: Arc<Value>, generation: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            let current = this.inner.memory.get(&key);
            if !current.is_some_and(|entry| Arc::ptr_eq(&entry.value, &value)) {
                debug!(key = %key, "entry replaced before write-behind, skipping");
                return;
            }
            let store = &this.inner.store;
            match store
                .put_fenced(table, &key.to_string(), (*value).clone(), generation)
                .await
            {
                Ok(_) => {}
                Err(e) if !store.is_available() => {
                    debug!(key = %key, error = %e, "persistent tier unavailable, value kept in memory only");
                }
                Err(e) => {
                    warn!(key = %key, table = table.as_str(), error = %e, "failed to persist fetched value");
                    metrics::counter!(telemetry::PERSIST_FAILURES_TOTAL).increment(1);
                }
            }
        });
    }
}

/// Open while an invalidation is replacing the persistent tier.
pub(crate) struct InvalidationWindow {
    inner: Arc<Inner>,
}

impl Drop for InvalidationWindow {
    fn drop(&mut self) {
        self.inner.invalidating.fetch_sub(1, Ordering::SeqCst);
    }
}
