//! Composite cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};

const COLLECTION_DATASET: &str = "collection";

/// Logical resource identifier: a dataset name plus optional sub-keys.
///
/// Rendered as `dataset:part1:part2`; the rendered form is the key used in
/// the persistent tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    dataset: String,
    parts: Vec<String>,
}

impl CacheKey {
    /// Key for a whole dataset, e.g. `assets`.
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            parts: Vec::new(),
        }
    }

    /// Append a sub-key, e.g. a CIK or ticker.
    pub fn with(mut self, part: impl Into<String>) -> Self {
        self.parts.push(part.into());
        self
    }

    /// Key under which a named collection is cached.
    pub fn collection(name: &str) -> Self {
        Self::new(COLLECTION_DATASET).with(name)
    }

    /// Whether this key names a whole collection.
    pub fn is_collection(&self) -> bool {
        self.dataset == COLLECTION_DATASET
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dataset)?;
        for part in &self.parts {
            write!(f, ":{part}")?;
        }
        Ok(())
    }
}

impl From<&str> for CacheKey {
    fn from(dataset: &str) -> Self {
        Self::new(dataset)
    }
}
