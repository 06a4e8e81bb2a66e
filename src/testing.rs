//! Test doubles shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::DataSource;
use crate::types::{CacheKey, FreshnessToken, Page};
use crate::{CacheError, Result};

/// Scripted data source counting every call.
///
/// Resources missing from the script answer "not found". Pages are served
/// in script order; a request without a cursor restarts the script.
#[derive(Default)]
pub(crate) struct MockSource {
    resources: HashMap<String, Value>,
    pages: HashMap<String, Vec<Page>>,
    page_index: Mutex<HashMap<String, usize>>,
    token: Mutex<Option<String>>,
    fail_token: AtomicBool,
    fail_resources: AtomicBool,
    delay: Option<Duration>,
    pub token_calls: AtomicU32,
    pub resource_calls: AtomicU32,
    pub page_calls: AtomicU32,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, key: &str, value: Value) -> Self {
        self.resources.insert(key.to_string(), value);
        self
    }

    pub fn with_pages(mut self, collection: &str, pages: Vec<Page>) -> Self {
        self.pages.insert(collection.to_string(), pages);
        self
    }

    pub fn with_token(self, token: &str) -> Self {
        self.set_token(Some(token));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_token(&self, token: Option<&str>) {
        *self.token.lock().unwrap() = token.map(str::to_string);
    }

    pub fn set_fail_token(&self, fail: bool) {
        self.fail_token.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_resources(&self, fail: bool) {
        self.fail_resources.store(fail, Ordering::SeqCst);
    }

    pub fn resource_calls(&self) -> u32 {
        self.resource_calls.load(Ordering::SeqCst)
    }

    pub fn token_calls(&self) -> u32 {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> u32 {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_freshness_token(&self) -> Result<Option<FreshnessToken>> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_token.load(Ordering::SeqCst) {
            return Err(CacheError::Http("connection refused".into()));
        }
        Ok(self.token.lock().unwrap().clone().map(FreshnessToken::new))
    }

    async fn fetch_resource(&self, key: &CacheKey) -> Result<Value> {
        self.resource_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_resources.load(Ordering::SeqCst) {
            return Err(CacheError::Http("connection reset".into()));
        }
        self.resources
            .get(&key.to_string())
            .cloned()
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn fetch_page(
        &self,
        collection: &str,
        cursor: Option<&str>,
        _page_size: usize,
    ) -> Result<Page> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let pages = self
            .pages
            .get(collection)
            .ok_or_else(|| CacheError::NotFound(collection.to_string()))?;
        let mut index = self.page_index.lock().unwrap();
        let next = index.entry(collection.to_string()).or_insert(0);
        if cursor.is_none() {
            *next = 0;
        }
        let page = pages
            .get(*next)
            .cloned()
            .ok_or_else(|| CacheError::Http(format!("no page {next} scripted")))?;
        *next += 1;
        Ok(page)
    }
}
