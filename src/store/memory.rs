//! In-process storage engine.
//!
//! Databases live in a shared map so a reopened connection sees the same
//! data, and deleting a database while a connection is open is refused,
//! like browser-embedded engines do. Failure switches let tests simulate
//! a disabled or broken store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::engine::{StorageEngine, StoreConnection};
use super::{PersistentRecord, Table};
use crate::{CacheError, Result};

#[derive(Default)]
struct MemoryDatabase {
    records: Mutex<HashMap<(Table, String), PersistentRecord>>,
    open_connections: AtomicUsize,
}

/// Storage engine keeping databases in memory.
#[derive(Default)]
pub struct MemoryEngine {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
    fail_open: AtomicBool,
    fail_delete: AtomicBool,
    opens: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose `open` always fails, as when storage is disabled.
    pub fn unavailable() -> Self {
        let engine = Self::default();
        engine.set_fail_open(true);
        engine
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `open` calls.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of successful `delete_database` calls.
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn database_exists(&self, database: &str) -> bool {
        lock(&self.databases).contains_key(database)
    }

    /// Records stored in `database`, across all tables.
    pub fn record_count(&self, database: &str) -> usize {
        lock(&self.databases)
            .get(database)
            .map(|db| lock(&db.records).len())
            .unwrap_or(0)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self, database: &str) -> Result<Arc<dyn StoreConnection>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(CacheError::StoreUnavailable(format!(
                "storage disabled, cannot open {database}"
            )));
        }
        let db = Arc::clone(lock(&self.databases).entry(database.to_string()).or_default());
        db.open_connections.fetch_add(1, Ordering::SeqCst);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            db,
            closed: AtomicBool::new(false),
        }))
    }

    async fn delete_database(&self, database: &str) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(CacheError::Io(format!("cannot delete {database}")));
        }
        let mut databases = lock(&self.databases);
        if let Some(db) = databases.get(database) {
            let open = db.open_connections.load(Ordering::SeqCst);
            if open > 0 {
                return Err(CacheError::StoreBusy(format!(
                    "{database} has {open} open connection(s)"
                )));
            }
            databases.remove(database);
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryConnection {
    db: Arc<MemoryDatabase>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CacheError::StoreClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn get(&self, table: Table, key: &str) -> Result<Option<PersistentRecord>> {
        self.check_open()?;
        Ok(lock(&self.db.records).get(&(table, key.to_string())).cloned())
    }

    async fn put(&self, table: Table, record: PersistentRecord) -> Result<()> {
        self.check_open()?;
        lock(&self.db.records).insert((table, record.key.clone()), record);
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        self.check_open()?;
        lock(&self.db.records).remove(&(table, key.to_string()));
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
