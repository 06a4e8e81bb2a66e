//! Core DataSource trait

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{CacheKey, FreshnessToken, Page};
use crate::Result;

/// The remote source of truth the cache tiers sit in front of.
///
/// Implementations surface transport failures as errors; resources that do
/// not exist should be reported as
/// [`CacheError::NotFound`](crate::CacheError::NotFound) (or a message
/// containing "not found") so reads can answer "absent".
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Source label for logs.
    fn name(&self) -> &str {
        "remote"
    }

    /// Token identifying the dataset generation currently served.
    ///
    /// `Ok(None)` when the server has no token to report.
    async fn fetch_freshness_token(&self) -> Result<Option<FreshnessToken>>;

    /// Fetch one resource.
    async fn fetch_resource(&self, key: &CacheKey) -> Result<Value>;

    /// Fetch one page of a collection. `cursor` is `None` for the first page.
    async fn fetch_page(
        &self,
        collection: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page>;
}
