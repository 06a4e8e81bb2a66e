//! Registry of fetches currently running, at most one per key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, Shared};

use crate::Result;
use crate::types::{CacheEntry, CacheKey};

/// Handle every caller of one fetch awaits.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<CacheEntry>>>;

type Slots = HashMap<CacheKey, (u64, SharedFetch)>;

#[derive(Default)]
pub(crate) struct InFlight {
    next_id: AtomicU64,
    slots: Arc<Mutex<Slots>>,
}

impl InFlight {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Join the fetch running for `key`, or register a new one built by
    /// `start`.
    ///
    /// Registration happens before `start` returns, under the registry
    /// lock, so a second caller can never miss it. `start` must move the
    /// guard into the task doing the work and must not drop it before
    /// returning; dropping the guard unregisters.
    ///
    /// Returns the handle and whether it was joined.
    pub(crate) fn join_or_start(
        &self,
        key: &CacheKey,
        start: impl FnOnce(InFlightGuard) -> SharedFetch,
    ) -> (SharedFetch, bool) {
        let mut slots = self.slots();
        if let Some((_, fetch)) = slots.get(key) {
            return (fetch.clone(), true);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = InFlightGuard {
            slots: Arc::clone(&self.slots),
            key: key.clone(),
            id,
        };
        let fetch = start(guard);
        slots.insert(key.clone(), (id, fetch.clone()));
        (fetch, false)
    }

    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.slots().contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }

    /// Forget every registration. Running fetches finish on their own but
    /// new callers no longer join them.
    pub(crate) fn clear(&self) {
        self.slots().clear();
    }

    pub(crate) fn remove(&self, key: &CacheKey) {
        self.slots().remove(key);
    }
}

/// Unregisters its fetch when dropped, whether the fetch succeeded,
/// failed, or its task panicked.
pub(crate) struct InFlightGuard {
    slots: Arc<Mutex<Slots>>,
    key: CacheKey,
    id: u64,
}

impl InFlightGuard {
    /// Whether this fetch is still the one registered for its key. False
    /// once the key or the whole registry was invalidated.
    pub(crate) fn is_current(&self) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        matches!(slots.get(&self.key), Some((id, _)) if *id == self.id)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        // a newer fetch may have replaced ours after a clear
        if matches!(slots.get(&self.key), Some((id, _)) if *id == self.id) {
            slots.remove(&self.key);
        }
    }
}
