//! Backend failure handling: the cache fails open and backs off.

mod common;

use catalogcache::cache::{CacheConfig, CacheKey, CacheLookup, QueryArguments};
use catalogcache::catalog::ResultSource;
use common::{Harness, T0, record};

fn published() -> QueryArguments {
    QueryArguments::new().with("status", "published")
}

#[tokio::test]
async fn eleventh_consecutive_miss_opens_the_breaker_until_cool_down() {
    let harness = Harness::new();
    let scope = harness.scope().clone();
    let key = CacheKey::from_raw("never-written");

    for _ in 0..10 {
        assert_eq!(harness.cache.get(&scope, &key).await, CacheLookup::Miss);
    }
    assert!(harness.cache.breaker().available());

    assert_eq!(harness.cache.get(&scope, &key).await, CacheLookup::Miss);
    assert_eq!(harness.cache.breaker().last_failure(), Some(T0));
    assert!(!harness.cache.breaker().available());

    harness.clock.advance(9);
    assert!(!harness.cache.breaker().available());
    harness.clock.advance(1);
    assert!(harness.cache.breaker().available());
    assert_eq!(harness.cache.breaker().last_failure(), None);
}

#[tokio::test]
async fn one_backend_failure_short_circuits_the_window() {
    let harness = Harness::new();
    harness.backend.set_failing(true);

    let first = harness.search.search(&published()).await;
    assert_eq!(first.source, ResultSource::Indexes);
    assert!(!harness.cache.breaker().available());

    // Open breaker: nothing reaches the backend.
    let calls = harness.backend.calls();
    for _ in 0..5 {
        harness.search.search(&published()).await;
    }
    assert_eq!(harness.backend.calls(), calls);

    harness.backend.set_failing(false);
    harness.clock.advance(10);
    harness.search.search(&published()).await;
    assert!(harness.backend.calls() > calls);
    assert_eq!(
        harness.search.search(&published()).await.source,
        ResultSource::Cache
    );
}

#[tokio::test]
async fn cool_down_restarts_from_the_latest_failure() {
    let harness = Harness::new();
    let scope = harness.scope().clone();
    let key = CacheKey::from_raw("k");
    harness.backend.set_failing(true);

    harness.cache.get(&scope, &key).await;
    harness.clock.advance(10);
    // Retry window elapsed, the retry fails again.
    harness.cache.get(&scope, &key).await;
    assert_eq!(harness.cache.breaker().last_failure(), Some(T0 + 10));

    harness.clock.advance(9);
    assert!(!harness.cache.breaker().available());
    harness.clock.advance(1);
    assert!(harness.cache.breaker().available());
}

#[tokio::test]
async fn failing_backend_never_changes_search_answers() {
    let harness = Harness::new();
    harness
        .hooks
        .catalog_object(&record(&[("status", "published")]), "/site/r1")
        .await
        .unwrap();
    harness.backend.set_failing(true);

    harness
        .hooks
        .catalog_object(&record(&[("status", "published")]), "/site/r2")
        .await
        .unwrap();
    let results = harness.search.search(&published()).await;
    assert_eq!(results.len(), 2);

    harness.hooks.uncatalog_object("/site/r1").await;
    let results = harness.search.search(&published()).await;
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn unconfigured_backend_is_never_used() {
    let harness = Harness::with_config(CacheConfig {
        enabled: false,
        ..Default::default()
    });
    harness
        .hooks
        .catalog_object(&record(&[("status", "published")]), "/site/r1")
        .await
        .unwrap();

    for _ in 0..3 {
        let results = harness.search.search(&published()).await;
        assert_eq!(results.source, ResultSource::Indexes);
        assert_eq!(results.len(), 1);
    }
    assert_eq!(harness.backend.calls(), 0);
}

#[tokio::test]
async fn partially_applied_write_opens_the_breaker() {
    let harness = Harness::new();
    harness
        .hooks
        .catalog_object(&record(&[("status", "published")]), "/site/r1")
        .await
        .unwrap();
    harness.backend.set_rejecting_writes(true);

    let first = harness.search.search(&published()).await;
    assert_eq!(first.source, ResultSource::Indexes);
    assert_eq!(first.len(), 1);
    assert_eq!(harness.cache.breaker().last_failure(), Some(T0));
    assert!(!harness.cache.breaker().available());
    // Everything but the rejected key landed.
    assert!(!harness.backend.inner().is_empty());

    let second = harness.search.search(&published()).await;
    assert_eq!(second.source, ResultSource::Indexes);
    assert_eq!(second.len(), 1);
}

#[tokio::test]
async fn refused_bulk_delete_opens_the_breaker() {
    let harness = Harness::new();
    harness
        .hooks
        .catalog_object(&record(&[("status", "published")]), "/site/r1")
        .await
        .unwrap();
    harness.search.search(&published()).await;
    assert_eq!(
        harness.search.search(&published()).await.source,
        ResultSource::Cache
    );
    harness.backend.set_refusing_deletes(true);

    harness
        .hooks
        .catalog_object(&record(&[("status", "draft")]), "/site/r1")
        .await
        .unwrap();

    assert_eq!(harness.cache.breaker().last_failure(), Some(T0));
    let results = harness.search.search(&published()).await;
    assert_eq!(results.source, ResultSource::Indexes);
    assert!(results.is_empty());
}

#[tokio::test]
async fn failed_bulk_delete_is_not_retried() {
    let harness = Harness::new();
    harness
        .hooks
        .catalog_object(&record(&[("status", "published")]), "/site/r1")
        .await
        .unwrap();
    harness.search.search(&published()).await;
    harness.backend.set_failing_op(Some("delete_multi"));

    let calls = harness.backend.calls();
    harness.hooks.uncatalog_object("/site/r1").await;

    // One list read and one delete; the open breaker stops anything further.
    assert_eq!(harness.backend.calls(), calls + 2);
    assert_eq!(harness.cache.breaker().last_failure(), Some(T0));
    let results = harness.search.search(&published()).await;
    assert_eq!(results.source, ResultSource::Indexes);
    assert!(results.is_empty());
}
