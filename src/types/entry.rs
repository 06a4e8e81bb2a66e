//! Cache entries and fetch results.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which tier produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Memory,
    Persistent,
    Remote,
}

impl Source {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Memory => "memory",
            Source::Persistent => "persistent",
            Source::Remote => "remote",
        }
    }
}

/// A cached value with its provenance.
///
/// Values are reference-counted so handing one to many readers never
/// copies the payload.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Arc<Value>,
    pub fetched_at: SystemTime,
    pub source: Source,
}

impl CacheEntry {
    pub fn new(value: impl Into<Arc<Value>>, source: Source) -> Self {
        Self {
            value: value.into(),
            fetched_at: SystemTime::now(),
            source,
        }
    }

    /// Same value, re-labelled as served from `source`.
    pub(crate) fn served_from(&self, source: Source) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
            source,
        }
    }
}

/// Result of a coordinated fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub entry: CacheEntry,
    /// Time spent by this caller, zero for memory hits.
    pub elapsed: Duration,
    /// Whether this caller joined a fetch another caller started.
    pub joined: bool,
}

impl Fetched {
    pub fn value(&self) -> &Arc<Value> {
        &self.entry.value
    }

    pub fn source(&self) -> Source {
        self.entry.source
    }
}
