//! REST data source.
//!
//! Endpoints, relative to the base URL:
//!
//! - `GET /api/data-freshness` → `{ "lastDataLoadDate": "…" | null }`
//! - `GET /api/{dataset}/{part…}` → resource JSON
//! - `GET /api/{collection}/full-dump?cursor=…&pageSize=…` → `{ items, nextCursor }`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::traits::DataSource;
use crate::types::{CacheKey, FreshnessToken, Page};
use crate::{CacheError, Result};

/// Settings for [`HttpDataSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Base URL, e.g. `https://example.com`.
    pub base_url: String,
    /// Path segment every endpoint lives under. Default: `api`.
    pub api_prefix: String,
    /// Freshness endpoint under the prefix. Default: `data-freshness`.
    pub freshness_endpoint: String,
    /// Paginated dump endpoint under a collection. Default: `full-dump`.
    pub dump_endpoint: String,
    /// Per-request timeout. Default: 30 seconds.
    pub timeout: Duration,
}

impl HttpSourceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_prefix: "api".to_string(),
            freshness_endpoint: "data-freshness".to_string(),
            dump_endpoint: "full-dump".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FreshnessResponse {
    #[serde(default)]
    last_data_load_date: Option<String>,
}

/// [`DataSource`] over HTTP/JSON.
#[derive(Clone)]
pub struct HttpDataSource {
    http: Client,
    base: Url,
    config: HttpSourceConfig,
}

impl HttpDataSource {
    /// Source rooted at `base_url` with default endpoints.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(HttpSourceConfig::new(base_url))
    }

    pub fn with_config(config: HttpSourceConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            CacheError::Configuration(format!("invalid base URL {}: {e}", config.base_url))
        })?;
        if base.cannot_be_a_base() {
            return Err(CacheError::Configuration(format!(
                "base URL {} cannot carry a path",
                config.base_url
            )));
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CacheError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base, config })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        // checked in the constructor
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push(&self.config.api_prefix)
                .extend(segments);
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        debug!(url = %url, "GET");
        let response = self
            .http
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(CacheError::from)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CacheError::NotFound(url.path().to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CacheError::Api {
                status: status.as_u16(),
                message: if message.is_empty() {
                    format!("GET {} returned {status}", url.path())
                } else {
                    message
                },
            });
        }

        response
            .json()
            .await
            .map_err(|e| CacheError::Json(format!("invalid response from {}: {e}", url.path())))
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_freshness_token(&self) -> Result<Option<FreshnessToken>> {
        let url = self.endpoint([self.config.freshness_endpoint.as_str()]);
        let body: FreshnessResponse = self.get_json(url, &[]).await?;
        Ok(body.last_data_load_date.map(FreshnessToken::new))
    }

    async fn fetch_resource(&self, key: &CacheKey) -> Result<Value> {
        let url = self.endpoint(
            std::iter::once(key.dataset()).chain(key.parts().iter().map(String::as_str)),
        );
        self.get_json(url, &[]).await
    }

    async fn fetch_page(
        &self,
        collection: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page> {
        let url = self.endpoint([collection, self.config.dump_endpoint.as_str()]);
        let mut query = Vec::with_capacity(2);
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        query.push(("pageSize", page_size.to_string()));
        self.get_json(url, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_built_under_prefix() {
        let source = HttpDataSource::new("http://localhost:8080/").unwrap();
        let url = source.endpoint(["assets", "AAPL"]);
        assert_eq!(url.as_str(), "http://localhost:8080/api/assets/AAPL");
    }

    #[test]
    fn parts_are_percent_encoded() {
        let source = HttpDataSource::new("http://localhost:8080").unwrap();
        let url = source.endpoint(["search", "a b/c"]);
        assert_eq!(url.path(), "/api/search/a%20b%2Fc");
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            HttpDataSource::new("not a url"),
            Err(CacheError::Configuration(_))
        ));
    }
}
