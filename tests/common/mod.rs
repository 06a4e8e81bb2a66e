//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use freshet::fence::MemoryVersionStore;
use freshet::{
    CacheError, CacheKey, CacheRuntime, DataSource, Freshet, FreshetBuilder, FreshnessToken,
    MemoryEngine, Page, Result,
};

// ============================================================================
// Scripted data source
// ============================================================================

/// Data source answering from a script, counting calls per kind.
#[derive(Default)]
pub struct ScriptedSource {
    token: Mutex<Option<String>>,
    resources: Mutex<HashMap<String, Value>>,
    pages: Mutex<HashMap<String, (Vec<Page>, usize)>>,
    delay: Mutex<Option<Duration>>,
    fail_resources: AtomicBool,
    token_calls: AtomicU32,
    resource_calls: AtomicU32,
    page_calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = Some(token.to_string());
    }

    pub fn set_resource(&self, key: &str, value: Value) {
        self.resources
            .lock()
            .unwrap()
            .insert(key.to_string(), value);
    }

    pub fn set_pages(&self, collection: &str, pages: Vec<Page>) {
        self.pages
            .lock()
            .unwrap()
            .insert(collection.to_string(), (pages, 0));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_fail_resources(&self, fail: bool) {
        self.fail_resources.store(fail, Ordering::SeqCst);
    }

    pub fn token_calls(&self) -> u32 {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn resource_calls(&self) -> u32 {
        self.resource_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> u32 {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_freshness_token(&self) -> Result<Option<FreshnessToken>> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.lock().unwrap().clone().map(FreshnessToken::new))
    }

    async fn fetch_resource(&self, key: &CacheKey) -> Result<Value> {
        self.resource_calls.fetch_add(1, Ordering::SeqCst);
        // answer is decided when the request arrives, not when it returns
        let answer = if self.fail_resources.load(Ordering::SeqCst) {
            Err(CacheError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            })
        } else {
            self.resources
                .lock()
                .unwrap()
                .get(&key.to_string())
                .cloned()
                .ok_or_else(|| CacheError::NotFound(key.to_string()))
        };
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    async fn fetch_page(
        &self,
        collection: &str,
        cursor: Option<&str>,
        _page_size: usize,
    ) -> Result<Page> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let mut pages = self.pages.lock().unwrap();
        let (script, next) = pages
            .get_mut(collection)
            .ok_or_else(|| CacheError::NotFound(collection.to_string()))?;
        if cursor.is_none() {
            *next = 0;
        }
        let page = script
            .get(*next)
            .cloned()
            .ok_or_else(|| CacheError::Http(format!("page {next} not scripted")))?;
        *next += 1;
        Ok(page)
    }
}

// ============================================================================
// Runtime helpers
// ============================================================================

/// Builder wired to `source`, an in-memory engine and an in-memory version
/// store seeded with `local`.
pub fn builder(source: Arc<ScriptedSource>, local: Option<&str>) -> FreshetBuilder {
    let versions = match local {
        Some(v) => MemoryVersionStore::with_version(v),
        None => MemoryVersionStore::new(),
    };
    Freshet::builder()
        .data_source(source)
        .engine(Arc::new(MemoryEngine::new()))
        .version_store(Arc::new(versions))
}

pub fn runtime(source: Arc<ScriptedSource>, local: Option<&str>) -> CacheRuntime {
    builder(source, local).build().unwrap()
}

/// Wait until the write-behind task has persisted `key`.
pub async fn wait_persisted(runtime: &CacheRuntime, key: &CacheKey) {
    let table = runtime.fetch_coordinator().table_for(key);
    for _ in 0..100 {
        if let Ok(Some(_)) = runtime.store().get(table, &key.to_string()).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{key} was never persisted");
}
