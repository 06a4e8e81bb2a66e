//! Filesystem storage engine.
//!
//! Layout: `<root>/<database>/<table>/<sha256 of key>.json`, one JSON file
//! per record. File names must stay stable across builds since the tree
//! outlives the process. Writes go to a per-writer temp file and are
//! renamed into place. The record carries its own key, so a hash collision
//! reads as absent rather than returning another key's value.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::engine::{StorageEngine, StoreConnection};
use super::{PersistentRecord, Table};
use crate::{CacheError, Result};

/// Storage engine backed by a directory tree.
pub struct FsEngine {
    root: PathBuf,
}

impl FsEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root: `~/.cache/freshet/stores`.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("freshet")
            .join("stores")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn database_dir(&self, database: &str) -> PathBuf {
        self.root.join(database)
    }
}

#[async_trait]
impl StorageEngine for FsEngine {
    fn name(&self) -> &str {
        "fs"
    }

    async fn open(&self, database: &str) -> Result<Arc<dyn StoreConnection>> {
        let dir = self.database_dir(database);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            CacheError::StoreUnavailable(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Arc::new(FsConnection {
            dir,
            closed: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }))
    }

    async fn delete_database(&self, database: &str) -> Result<()> {
        let dir = self.database_dir(database);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(format!(
                "failed to delete {}: {e}",
                dir.display()
            ))),
        }
    }
}

struct FsConnection {
    dir: PathBuf,
    closed: AtomicBool,
    writes: AtomicU64,
}

impl FsConnection {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CacheError::StoreClosed)
        } else {
            Ok(())
        }
    }

    fn record_path(&self, table: Table, key: &str) -> PathBuf {
        self.dir.join(table.as_str()).join(record_file_name(key))
    }

    /// Temp path unique to this write, so concurrent puts of one key never
    /// rename each other's file away.
    fn temp_path(&self, path: &Path) -> PathBuf {
        let n = self.writes.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("json.{}-{n}.tmp", std::process::id()))
    }
}

fn record_file_name(key: &str) -> String {
    format!("{}.json", hex::encode(Sha256::digest(key.as_bytes())))
}

#[async_trait]
impl StoreConnection for FsConnection {
    async fn get(&self, table: Table, key: &str) -> Result<Option<PersistentRecord>> {
        self.check_open()?;
        let path = self.record_path(table, key);
        let content = match tokio::fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<PersistentRecord>(&content) {
            Ok(record) if record.key == key => Ok(Some(record)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt store record, ignoring");
                Ok(None)
            }
        }
    }

    async fn put(&self, table: Table, record: PersistentRecord) -> Result<()> {
        self.check_open()?;
        let path = self.record_path(table, &record.key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec(&record)?;
        let tmp_path = self.temp_path(&path);
        tokio::fs::write(&tmp_path, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        self.check_open()?;
        match tokio::fs::remove_file(self.record_path(table, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
