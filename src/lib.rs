//! Freshet - client-side data freshness and cache coherence
//!
//! Freshet sits between a UI layer and a read-mostly REST backend whose
//! dataset is periodically replaced wholesale. It keeps two cache tiers
//! (an in-memory tier and a durable persistent tier) coherent with the
//! server's current dataset generation:
//!
//! - a version fence compares the server's freshness token against the last
//!   one seen and invalidates every tier when it changes,
//! - a fetch coordinator de-duplicates concurrent fetches of one key and
//!   falls through memory, persistent store and remote source,
//! - a sync engine bulk-loads large reference collections by cursor
//!   pagination.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use freshet::{CacheKey, CollectionSpec, Freshet, HttpDataSource};
//!
//! #[tokio::main]
//! async fn main() -> freshet::Result<()> {
//!     let runtime = Freshet::builder()
//!         .data_source(Arc::new(HttpDataSource::new("http://localhost:3000")?))
//!         .collection(CollectionSpec::paginated("searches", 1000))
//!         .build()?;
//!
//!     // Invalidates every tier if the dataset was replaced since last run.
//!     runtime.initialize_with_freshness_check().await;
//!
//!     let assets = runtime.get(&CacheKey::new("assets")).await?;
//!     println!("{assets}");
//!
//!     let searches = runtime.collection("searches").await?;
//!     println!("{} searches", searches.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fence;
pub mod fetch;
pub mod invalidate;
pub mod monitor;
pub mod runtime;
pub mod source;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use config::Config;
pub use error::{CacheError, Result};
pub use fence::{FileVersionStore, MemoryVersionStore, VersionFence, VersionStore};
pub use fetch::{FetchCoordinator, MemoryConfig};
pub use invalidate::{CacheInvalidator, KeyedCache, LocalCache};
pub use monitor::{FreshnessConfig, FreshnessMonitor, MonitorState};
pub use runtime::{CacheRuntime, Freshet, FreshetBuilder};
pub use store::{
    FsEngine, MemoryEngine, PersistentStore, StorageEngine, StoreConfig, StoreState, Table,
};
pub use sync::{CollectionSpec, CollectionSyncEngine, LoadStrategy, SyncMarker};
pub use traits::DataSource;

#[cfg(feature = "http")]
pub use source::{HttpDataSource, HttpSourceConfig};

// Re-export all types
pub use types::{
    CacheEntry, CacheKey, Fetched, FreshnessCheck, FreshnessToken, Page, ReadState, Source,
    SyncState,
};
