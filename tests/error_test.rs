use freshet::{CacheError, Result};

#[test]
fn test_error_display() {
    let err = CacheError::UnknownCollection("searches".to_string());
    assert!(err.to_string().contains("searches"));
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(CacheError::StoreClosed)
    }
    assert!(returns_error().is_err());
}

#[test]
fn test_json_error_conversion() {
    fn parse() -> Result<serde_json::Value> {
        Ok(serde_json::from_str("{not json")?)
    }
    assert!(matches!(parse(), Err(CacheError::Json(_))));
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn wrapped_not_found_is_still_not_found() {
    let err = CacheError::FetchFailed {
        key: "cik:0001".into(),
        cause: std::sync::Arc::new(CacheError::Http("HTTP 404 Not Found".into())),
    };
    assert!(err.is_not_found());
}

#[test]
fn clones_share_the_cause() {
    let err = CacheError::fetch_failed("assets", CacheError::Http("reset".into()));
    let copy = err.clone();
    match (&err, &copy) {
        (CacheError::FetchFailed { cause: a, .. }, CacheError::FetchFailed { cause: b, .. }) => {
            assert!(std::sync::Arc::ptr_eq(a, b));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn remote_errors_are_not_store_failures() {
    assert!(!CacheError::NotFound("x".into()).is_store_failure());
    assert!(
        !CacheError::Api {
            status: 500,
            message: "x".into()
        }
        .is_store_failure()
    );
    assert!(CacheError::StoreUnavailable("disk full".into()).is_store_failure());
}
