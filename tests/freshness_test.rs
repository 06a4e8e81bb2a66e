//! Integration tests for version fencing and the freshness monitor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{ScriptedSource, builder, runtime, wait_persisted};
use freshet::{
    CacheKey, FileVersionStore, Freshet, FreshnessConfig, FsEngine, MonitorState, Source,
};

// =============================================================================
// Startup check
// =============================================================================

#[tokio::test]
async fn first_run_stores_server_version_without_invalidating() {
    let source = ScriptedSource::new();
    source.set_token("2024-05-01");
    let rt = runtime(source.clone(), None);

    assert!(!rt.initialize_with_freshness_check().await);
    assert_eq!(
        rt.monitor().fence().local_version().await,
        Some("2024-05-01".into())
    );

    source.set_token("2024-06-01");
    let check = rt.monitor().fence().check_freshness(source.as_ref()).await;
    assert!(check.is_stale);
    assert_eq!(check.local_version, Some("2024-05-01".into()));
    assert_eq!(check.server_version, Some("2024-06-01".into()));
}

#[tokio::test]
async fn equal_versions_are_fresh() {
    let source = ScriptedSource::new();
    source.set_token("2024-05-01");
    let rt = runtime(source.clone(), Some("2024-05-01"));

    let check = rt.monitor().fence().check_freshness(source.as_ref()).await;
    assert!(!check.is_stale);
    assert!(!rt.initialize_with_freshness_check().await);
    assert_eq!(rt.monitor().state(), MonitorState::Fresh);
}

#[tokio::test]
async fn missing_server_token_is_fresh_and_not_stored() {
    let source = ScriptedSource::new();
    let rt = runtime(source, None);

    assert!(!rt.initialize_with_freshness_check().await);
    assert_eq!(rt.monitor().fence().local_version().await, None);
}

// =============================================================================
// Dataset swap
// =============================================================================

#[tokio::test]
async fn stale_swap_refetches_from_remote_exactly_once() {
    let source = ScriptedSource::new();
    source.set_token("v1");
    source.set_resource("assets", json!(["AAPL"]));
    let rt = runtime(source.clone(), Some("v1"));

    assert!(!rt.initialize_with_freshness_check().await);
    let key = CacheKey::new("assets");
    rt.fetch(&key).await.unwrap();
    wait_persisted(&rt, &key).await;
    assert_eq!(source.resource_calls(), 1);

    // dataset replaced server-side
    source.set_token("v2");
    source.set_resource("assets", json!(["AAPL", "MSFT"]));
    assert!(rt.check_on_focus().await);
    assert_eq!(rt.monitor().fence().local_version().await, Some("v2".into()));

    let fetched = rt.fetch(&key).await.unwrap();
    assert_eq!(fetched.source(), Source::Remote);
    assert_eq!(*fetched.value().as_ref(), json!(["AAPL", "MSFT"]));
    rt.fetch(&key).await.unwrap();
    assert_eq!(source.resource_calls(), 2);
}

#[tokio::test]
async fn repopulates_configured_collections_after_swap() {
    let source = ScriptedSource::new();
    source.set_token("v2");
    source.set_resource("assets", json!(["AAPL"]));
    let rt = builder(source.clone(), Some("v1"))
        .collection(freshet::CollectionSpec::eager("assets", "assets"))
        .freshness(FreshnessConfig::new().repopulate("assets"))
        .build()
        .unwrap();

    assert!(rt.initialize_with_freshness_check().await);

    for _ in 0..100 {
        if rt.sync_state("assets").is_some_and(|s| s.is_complete()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(rt.sync_state("assets").is_some_and(|s| s.is_complete()));
    assert_eq!(source.resource_calls(), 1);
}

// =============================================================================
// Durable state across restarts
// =============================================================================

#[tokio::test]
async fn version_and_store_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    source.set_token("v1");
    source.set_resource("assets", json!(["AAPL"]));
    let key = CacheKey::new("assets");

    let start = || {
        Freshet::builder()
            .data_source(source.clone())
            .engine(Arc::new(FsEngine::new(dir.path().join("stores"))))
            .version_store(Arc::new(FileVersionStore::new(
                dir.path().join("data-version.json"),
            )))
            .build()
            .unwrap()
    };

    let first = start();
    assert!(!first.initialize_with_freshness_check().await);
    first.fetch(&key).await.unwrap();
    wait_persisted(&first, &key).await;
    drop(first);

    // same dataset: served from disk
    let second = start();
    assert!(!second.initialize_with_freshness_check().await);
    let fetched = second.fetch(&key).await.unwrap();
    assert_eq!(fetched.source(), Source::Persistent);
    assert_eq!(source.resource_calls(), 1);
    drop(second);

    // dataset replaced while the app was closed
    source.set_token("v2");
    let third = start();
    assert!(third.initialize_with_freshness_check().await);
    let fetched = third.fetch(&key).await.unwrap();
    assert_eq!(fetched.source(), Source::Remote);
    assert_eq!(source.resource_calls(), 2);
}

// =============================================================================
// Focus debounce
// =============================================================================

#[tokio::test(start_paused = true)]
async fn focus_checks_inside_debounce_window_make_no_calls() {
    let source = ScriptedSource::new();
    source.set_token("v1");
    let rt = builder(source.clone(), Some("v1"))
        .freshness(FreshnessConfig::new().focus_debounce(Duration::from_secs(5)))
        .build()
        .unwrap();

    assert!(!rt.check_on_focus().await);
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!rt.check_on_focus().await);
    assert_eq!(source.token_calls(), 1);

    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(!rt.check_on_focus().await);
    assert_eq!(source.token_calls(), 2);
}
