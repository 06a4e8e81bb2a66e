//! Telemetry metric name constants.
//!
//! Centralised metric names for freshet operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `freshet_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `tier`: tier that answered: "memory", "persistent" or "remote"
//! - `status`: outcome: "ok", "error" or "failed"
//! - `outcome`: freshness check result: "fresh", "stale", "first_seen", "failed"

/// Reads answered by a cache tier.
///
/// Labels: `tier`.
pub const TIER_HITS_TOTAL: &str = "freshet_tier_hits_total";

/// Remote fetches actually issued.
///
/// Labels: `status` ("ok" | "not_found" | "error").
pub const REMOTE_FETCHES_TOTAL: &str = "freshet_remote_fetches_total";

/// Callers that joined a fetch already in flight instead of starting one.
pub const INFLIGHT_JOINS_TOTAL: &str = "freshet_inflight_joins_total";

/// Cache invalidations.
///
/// Labels: `status` ("ok" | "failed").
pub const INVALIDATIONS_TOTAL: &str = "freshet_invalidations_total";

/// Freshness checks performed against the server.
///
/// Labels: `outcome`.
pub const FRESHNESS_CHECKS_TOTAL: &str = "freshet_freshness_checks_total";

/// Focus-triggered checks skipped by the debounce window.
pub const FOCUS_CHECKS_DEBOUNCED_TOTAL: &str = "freshet_focus_checks_debounced_total";

/// Collection pages fetched during paginated syncs.
///
/// Labels: `collection`.
pub const SYNC_PAGES_TOTAL: &str = "freshet_sync_pages_total";

/// Writes to the persistent tier that failed (reads were still served).
pub const PERSIST_FAILURES_TOTAL: &str = "freshet_persist_failures_total";
