//! Version fencing against the server's freshness token.
//!
//! The last token seen is persisted by a [`VersionStore`] that lives
//! outside the persistent cache tier, so it survives that tier being
//! deleted and carries across process restarts.
//!
//! Comparison is exact equality. A server token that merely differs,
//! including one that looks older after a clock rollback, counts as stale.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::now_ms;
use crate::telemetry;
use crate::traits::DataSource;
use crate::types::{FreshnessCheck, FreshnessToken};
use crate::{CacheError, Result};

/// What the version store persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVersion {
    pub last_data_load_date: FreshnessToken,
    /// When the version was written, milliseconds since the epoch.
    pub checked_at: u64,
}

/// Durable home of the last known freshness token.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn load(&self) -> Result<Option<StoredVersion>>;
    async fn save(&self, version: &StoredVersion) -> Result<()>;
}

/// Version store kept in memory; lost on restart.
#[derive(Default)]
pub struct MemoryVersionStore {
    current: Mutex<Option<StoredVersion>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `token`.
    pub fn with_version(token: impl Into<FreshnessToken>) -> Self {
        Self {
            current: Mutex::new(Some(StoredVersion {
                last_data_load_date: token.into(),
                checked_at: now_ms(),
            })),
        }
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn load(&self) -> Result<Option<StoredVersion>> {
        Ok(self.current.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn save(&self, version: &StoredVersion) -> Result<()> {
        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = Some(version.clone());
        Ok(())
    }
}

/// Version store backed by a small JSON file.
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default path: `~/.cache/freshet/data-version.json`.
    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("freshet")
            .join("data-version.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VersionStore for FileVersionStore {
    /// Missing or corrupt files read as "no version" (corrupt ones logged).
    async fn load(&self) -> Result<Option<StoredVersion>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read stored data version");
                return Ok(None);
            }
        };
        match serde_json::from_str(&content) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt stored data version");
                Ok(None)
            }
        }
    }

    /// Atomic write via tmp + rename.
    async fn save(&self, version: &StoredVersion) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CacheError::Io(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let json = serde_json::to_string(version)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            CacheError::Io(format!("failed to write {}: {e}", tmp_path.display()))
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            CacheError::Io(format!(
                "failed to rename {} → {}: {e}",
                tmp_path.display(),
                self.path.display()
            ))
        })?;
        Ok(())
    }
}

/// Compares the stored token with the server's.
pub struct VersionFence {
    store: Arc<dyn VersionStore>,
}

impl VersionFence {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self { store }
    }

    /// The persisted token, if any. Read failures count as "none".
    pub async fn local_version(&self) -> Option<FreshnessToken> {
        match self.store.load().await {
            Ok(v) => v.map(|v| v.last_data_load_date),
            Err(e) => {
                warn!(error = %e, "could not load stored data version");
                None
            }
        }
    }

    pub async fn set_local_version(&self, token: &FreshnessToken) -> Result<()> {
        self.store
            .save(&StoredVersion {
                last_data_load_date: token.clone(),
                checked_at: now_ms(),
            })
            .await
    }

    /// Ask `source` for its token and classify it against ours.
    ///
    /// Fail-open: a failed fetch is logged and reported as fresh so cached
    /// data keeps being served. Nothing is persisted here; on a first-seen
    /// result the caller stores the server version.
    pub async fn check_freshness(&self, source: &dyn DataSource) -> FreshnessCheck {
        let server = match source.fetch_freshness_token().await {
            Ok(token) => token,
            Err(e) => {
                let e = CacheError::FreshnessCheckFailed(e.to_string());
                warn!(source = source.name(), error = %e, "continuing with cache");
                metrics::counter!(telemetry::FRESHNESS_CHECKS_TOTAL, "outcome" => "failed")
                    .increment(1);
                return FreshnessCheck::assume_fresh(self.local_version().await);
            }
        };

        let check = FreshnessCheck::classify(self.local_version().await, server);
        let outcome = if check.is_stale {
            "stale"
        } else if check.is_first_seen() {
            "first_seen"
        } else {
            "fresh"
        };
        debug!(
            outcome,
            local = ?check.local_version.as_ref().map(FreshnessToken::as_str),
            server = ?check.server_version.as_ref().map(FreshnessToken::as_str),
            "freshness checked"
        );
        metrics::counter!(telemetry::FRESHNESS_CHECKS_TOTAL, "outcome" => outcome).increment(1);
        check
    }
}
