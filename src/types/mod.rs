//! Public types for the Freshet API.

mod entry;
mod freshness;
mod key;
mod page;
mod read;
mod sync;
mod token;

pub use entry::{CacheEntry, Fetched, Source};
pub use freshness::FreshnessCheck;
pub use key::CacheKey;
pub use page::Page;
pub use read::ReadState;
pub use sync::SyncState;
pub use token::FreshnessToken;
