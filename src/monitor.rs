//! Freshness checks at lifecycle points.
//!
//! ```text
//! Uninitialized → Checking → Fresh
//!                          → Invalidating → Fresh
//! ```
//!
//! [`FreshnessMonitor::initialize_with_freshness_check()`] runs once per
//! monitor no matter how many callers race it; all of them get the same
//! answer. [`FreshnessMonitor::check_on_focus()`] may run any number of
//! times but skips checks within the debounce window of the previous one.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::fence::VersionFence;
use crate::invalidate::CacheInvalidator;
use crate::store::duration_secs;
use crate::sync::CollectionSyncEngine;
use crate::telemetry;
use crate::traits::DataSource;
use crate::types::FreshnessToken;
use crate::Result;

/// Default debounce for focus-triggered checks.
pub const DEFAULT_FOCUS_DEBOUNCE: Duration = Duration::from_secs(5);

/// Freshness monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Minimum spacing between focus-triggered checks. Default: 5 seconds.
    #[serde(with = "duration_secs")]
    pub focus_debounce: Duration,
    /// Collections preloaded in the background after an invalidation.
    pub repopulate: Vec<String>,
    /// Where the data version is stored. Default: `~/.cache/freshet/data-version.json`.
    pub version_path: Option<PathBuf>,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            focus_debounce: DEFAULT_FOCUS_DEBOUNCE,
            repopulate: Vec::new(),
            version_path: None,
        }
    }
}

impl FreshnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focus_debounce(mut self, debounce: Duration) -> Self {
        self.focus_debounce = debounce;
        self
    }

    pub fn repopulate(mut self, collection: impl Into<String>) -> Self {
        self.repopulate.push(collection.into());
        self
    }

    pub fn version_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.version_path = Some(path.into());
        self
    }
}

/// Where the monitor is in its check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Uninitialized,
    Checking,
    Fresh,
    Invalidating,
}

/// Drives version checks and invalidation.
pub struct FreshnessMonitor {
    fence: VersionFence,
    source: Arc<dyn DataSource>,
    invalidator: Arc<CacheInvalidator>,
    sync: Option<Arc<CollectionSyncEngine>>,
    config: FreshnessConfig,
    state: Mutex<MonitorState>,
    initialized: OnceCell<bool>,
    last_focus_check: Mutex<Option<Instant>>,
}

impl FreshnessMonitor {
    pub fn new(
        fence: VersionFence,
        source: Arc<dyn DataSource>,
        invalidator: Arc<CacheInvalidator>,
        config: FreshnessConfig,
    ) -> Self {
        Self {
            fence,
            source,
            invalidator,
            sync: None,
            config,
            state: Mutex::new(MonitorState::Uninitialized),
            initialized: OnceCell::new(),
            last_focus_check: Mutex::new(None),
        }
    }

    /// Engine used to repopulate `FreshnessConfig::repopulate` after an
    /// invalidation.
    pub fn with_sync_engine(mut self, sync: Arc<CollectionSyncEngine>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    pub fn fence(&self) -> &VersionFence {
        &self.fence
    }

    pub fn config(&self) -> &FreshnessConfig {
        &self.config
    }

    /// Startup check. Returns whether the caches were invalidated.
    ///
    /// Runs at most once; concurrent and later callers share the first
    /// call's outcome.
    pub async fn initialize_with_freshness_check(&self) -> bool {
        let mut ran = false;
        let invalidated = *self
            .initialized
            .get_or_init(|| {
                ran = true;
                self.check_and_invalidate("startup")
            })
            .await;
        if !ran {
            debug!(invalidated, "startup freshness check already done");
        }
        invalidated
    }

    /// Check after the app regains focus. Returns whether the caches were
    /// invalidated; `false` without any network call inside the debounce
    /// window.
    pub async fn check_on_focus(&self) -> bool {
        let now = Instant::now();
        {
            let mut last = self
                .last_focus_check
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            if let Some(previous) = *last {
                if now.duration_since(previous) < self.config.focus_debounce {
                    debug!("focus check debounced");
                    metrics::counter!(telemetry::FOCUS_CHECKS_DEBOUNCED_TOTAL).increment(1);
                    return false;
                }
            }
            *last = Some(now);
        }
        self.check_and_invalidate("focus").await
    }

    /// Invalidate unconditionally, then record the server's current token
    /// if it can be fetched.
    pub async fn invalidate_now(&self) -> Result<bool> {
        self.set_state(MonitorState::Invalidating);
        let result = self.invalidator.invalidate_all().await;
        match self.source.fetch_freshness_token().await {
            Ok(Some(token)) => self.record_version(&token).await,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not fetch data version after manual invalidation"),
        }
        self.set_state(MonitorState::Fresh);
        self.repopulate();
        result.map(|()| true)
    }

    async fn check_and_invalidate(&self, trigger: &'static str) -> bool {
        self.set_state(MonitorState::Checking);
        let check = self.fence.check_freshness(self.source.as_ref()).await;

        let invalidated = match (check.is_stale, check.server_version.as_ref()) {
            (true, Some(server)) => {
                info!(
                    trigger,
                    local = ?check.local_version.as_ref().map(FreshnessToken::as_str),
                    server = server.as_str(),
                    "dataset replaced, invalidating caches"
                );
                self.set_state(MonitorState::Invalidating);
                // on failure memory is already empty and the store disabled
                let _ = self.invalidator.invalidate_all().await;
                self.record_version(server).await;
                self.repopulate();
                true
            }
            (false, Some(server)) if check.is_first_seen() => {
                info!(trigger, server = server.as_str(), "first run, storing data version");
                self.record_version(server).await;
                false
            }
            _ => {
                debug!(trigger, "cache is fresh");
                false
            }
        };

        self.set_state(MonitorState::Fresh);
        invalidated
    }

    async fn record_version(&self, token: &FreshnessToken) {
        if let Err(e) = self.fence.set_local_version(token).await {
            warn!(version = token.as_str(), error = %e, "failed to store data version");
        }
    }

    /// Preload configured collections in the background.
    fn repopulate(&self) {
        let Some(sync) = &self.sync else {
            return;
        };
        for name in &self.config.repopulate {
            let sync = Arc::clone(sync);
            let name = name.clone();
            tokio::spawn(async move {
                if let Err(e) = sync.preload(&name).await {
                    warn!(collection = %name, error = %e, "repopulation failed");
                }
            });
        }
    }
}
