//! Freshet error types

use std::sync::Arc;

/// Freshet error types.
///
/// `Clone` so a single shared fetch can hand the same failure to every
/// caller waiting on it. Foreign errors are captured as messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    // Persistent tier
    #[error("persistent store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store connection is closed")]
    StoreClosed,

    /// The engine refused to delete a database while a connection is open.
    #[error("store busy: {0}")]
    StoreBusy(String),

    /// Close/delete/reopen failed. The store stays memory-only for the
    /// remainder of the session.
    #[error("store invalidation failed: {0}")]
    InvalidationFailed(String),

    // Remote source
    #[error("freshness check failed: {0}")]
    FreshnessCheckFailed(String),

    #[error("fetch failed for {key}: {cause}")]
    FetchFailed { key: String, cause: Arc<CacheError> },

    #[error("not found: {0}")]
    NotFound(String),

    /// The background task running a shared fetch panicked or was aborted.
    #[error("fetch task failed: {0}")]
    TaskFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    // Data errors
    #[error("JSON error: {0}")]
    Json(String),

    #[error("I/O error: {0}")]
    Io(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),
}

impl CacheError {
    /// Wrap a remote failure for `key`.
    ///
    /// Not-found outcomes pass through unwrapped so callers can map them to
    /// an absent result.
    pub fn fetch_failed(key: impl ToString, cause: CacheError) -> Self {
        match cause {
            e @ (CacheError::NotFound(_) | CacheError::FetchFailed { .. }) => e,
            cause => CacheError::FetchFailed {
                key: key.to_string(),
                cause: Arc::new(cause),
            },
        }
    }

    /// Whether the error represents a domain-level "no such resource".
    pub fn is_not_found(&self) -> bool {
        match self {
            CacheError::NotFound(_) => true,
            CacheError::Api { status, .. } => *status == 404,
            CacheError::FetchFailed { cause, .. } => cause.is_not_found(),
            CacheError::Http(msg) => message_says_not_found(msg),
            _ => false,
        }
    }

    /// Whether the error comes from the persistent tier.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            CacheError::StoreUnavailable(_)
                | CacheError::StoreClosed
                | CacheError::StoreBusy(_)
                | CacheError::InvalidationFailed(_)
        )
    }

    /// Map a transport-level message onto the taxonomy.
    ///
    /// Only a "not found" phrase is interpreted; everything else stays an
    /// opaque HTTP error. Bare status digits are ignored since transport
    /// messages embed the request URL.
    pub fn from_transport_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if message_says_not_found(&msg) {
            CacheError::NotFound(msg)
        } else {
            CacheError::Http(msg)
        }
    }
}

fn message_says_not_found(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("not found")
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Json(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            CacheError::NotFound(err.to_string())
        } else {
            CacheError::Http(err.to_string())
        }
    }
}

/// Result type alias for Freshet operations
pub type Result<T> = std::result::Result<T, CacheError>;
