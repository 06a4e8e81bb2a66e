//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (`--config <path>`)
//! 2. `~/.freshet/config.toml` (user)
//! 3. `/etc/freshet/config.toml` (system)
//!
//! ```toml
//! detail_datasets = ["cik-quarterly"]
//!
//! [source]
//! base_url = "http://localhost:3000"
//!
//! [store]
//! engine = "fs"
//! max_age = 604800
//!
//! [freshness]
//! focus_debounce = 5
//! repopulate = ["searches"]
//!
//! [[collections]]
//! name = "searches"
//! strategy = "paginated"
//! page_size = 1000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::fetch::MemoryConfig;
use crate::monitor::FreshnessConfig;
use crate::store::{FsEngine, MemoryEngine, StorageEngine, StoreConfig};
use crate::sync::CollectionSpec;
use crate::{CacheError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
    /// Datasets persisted as entity detail rows.
    #[serde(default)]
    pub detail_datasets: Vec<String>,
}

/// Remote data source settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the REST API.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// Which storage engine backs the persistent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Fs,
    Memory,
}

/// Persistent tier settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub engine: EngineKind,
    /// Root directory of the `fs` engine (default: `~/.cache/freshet/stores`).
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(flatten)]
    pub settings: StoreConfig,
}

impl StoreSection {
    /// Instantiate the configured engine.
    pub fn engine(&self) -> Arc<dyn StorageEngine> {
        match self.engine {
            EngineKind::Memory => Arc::new(MemoryEngine::new()),
            EngineKind::Fs => Arc::new(FsEngine::new(
                self.root.clone().unwrap_or_else(FsEngine::default_root),
            )),
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.freshet/config.toml`
    /// 3. `/etc/freshet/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?.ok_or_else(|| {
            CacheError::Configuration(
                "No config file found. Create ~/.freshet/config.toml or /etc/freshet/config.toml"
                    .to_string(),
            )
        })?;
        Self::load_from_file(&path)
    }

    /// Like [`load()`](Self::load), but defaults when no file exists.
    ///
    /// An explicit path that does not exist is still an error.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CacheError::Configuration(format!("Failed to parse config: {e}")))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            CacheError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(CacheError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".freshet").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/freshet/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}
