//! Storage primitive traits.
//!
//! A [`StorageEngine`] names and manages whole databases; a
//! [`StoreConnection`] is a live handle to one of them. Engines must make
//! every operation on a closed connection fail with
//! [`CacheError::StoreClosed`](crate::CacheError::StoreClosed).

use std::sync::Arc;

use async_trait::async_trait;

use super::{PersistentRecord, Table};
use crate::Result;

/// Embedded key-value database engine.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Engine label for logs.
    fn name(&self) -> &str;

    /// Open (creating if needed) the database called `database`.
    async fn open(&self, database: &str) -> Result<Arc<dyn StoreConnection>>;

    /// Delete the database and everything in it.
    ///
    /// May fail with `StoreBusy` if a connection is still open. Deleting a
    /// database that does not exist is not an error.
    async fn delete_database(&self, database: &str) -> Result<()>;
}

/// Live connection to one database.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    async fn get(&self, table: Table, key: &str) -> Result<Option<PersistentRecord>>;

    /// Upsert; overwrites silently.
    async fn put(&self, table: Table, record: PersistentRecord) -> Result<()>;

    async fn delete(&self, table: Table, key: &str) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn close(&self);

    fn is_open(&self) -> bool;
}
