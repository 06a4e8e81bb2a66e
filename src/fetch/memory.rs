//! In-memory cache tier.

use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use crate::store::duration_secs;
use crate::types::{CacheEntry, CacheKey};

/// Configuration for the memory tier.
///
/// ```rust
/// # use freshet::MemoryConfig;
/// # use std::time::Duration;
/// let config = MemoryConfig::new()
///     .max_entries(5_000)
///     .ttl(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of cached values. Default: 10,000.
    pub max_entries: u64,
    /// Time-to-live for cached values. Default: 30 minutes.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// How long a "not found" answer is remembered. Default: 5 minutes.
    #[serde(with = "duration_secs")]
    pub absent_ttl: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(30 * 60),
            absent_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn absent_ttl(mut self, ttl: Duration) -> Self {
        self.absent_ttl = ttl;
        self
    }
}

/// Resolved values plus the negative cache of keys the source said do
/// not exist.
pub(crate) struct MemoryTier {
    entries: Cache<CacheKey, CacheEntry>,
    absent: Cache<CacheKey, ()>,
}

impl MemoryTier {
    pub(crate) fn new(config: &MemoryConfig) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.ttl)
                .build(),
            absent: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.absent_ttl)
                .build(),
        }
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key)
    }

    pub(crate) fn is_absent(&self, key: &CacheKey) -> bool {
        self.absent.contains_key(key)
    }

    pub(crate) fn insert(&self, key: CacheKey, entry: CacheEntry) {
        self.absent.invalidate(&key);
        self.entries.insert(key, entry);
    }

    pub(crate) fn mark_absent(&self, key: CacheKey) {
        self.entries.invalidate(&key);
        self.absent.insert(key, ());
    }

    pub(crate) fn remove(&self, key: &CacheKey) {
        self.entries.invalidate(key);
        self.absent.invalidate(key);
    }

    pub(crate) fn clear(&self) {
        self.entries.invalidate_all();
        self.absent.invalidate_all();
    }
}
