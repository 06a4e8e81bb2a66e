//! Freshness token reported by the remote source.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque marker of which generation of the dataset is authoritative.
///
/// Typically the server's "last data load" timestamp. Compared by exact
/// equality only: any difference means stale, including a token that
/// looks older. There is intentionally no `Ord` impl.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FreshnessToken(String);

impl FreshnessToken {
    /// Create a token from its raw server representation.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FreshnessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FreshnessToken {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for FreshnessToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
