//! Error path E2E tests for fc-search.
//!
//! Unknown channels, channels without a build, empty queries and paging
//! edges, as seen by query callers.

use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::{generated_packages, options, packages, TestHarness};
use fc_search_index::{QueryError, Readiness, SearchOptions};
use fc_search_scheduler::SchedulerError;
use fc_search_types::RecordKind;

const CHANNEL: &str = "fc-24.11-production";
const DEV: &str = "fc-25.05-dev";

async fn ready_harness() -> TestHarness {
    let harness = TestHarness::new(&[CHANNEL, DEV]);
    harness.write_feed(
        CHANNEL,
        &options(&["services.nginx.enable"]),
        &packages(&["nginx", "curl"]),
    );
    harness.worker.refresh_channel(CHANNEL).await.unwrap();
    harness
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_channel_is_distinct_from_not_ready() {
    let harness = ready_harness().await;

    let err = harness
        .engine
        .search("nonexistent-channel", "nginx", None)
        .unwrap_err();
    assert_eq!(err, QueryError::UnknownChannel("nonexistent-channel".to_string()));

    let err = harness.engine.search(DEV, "nginx", None).unwrap_err();
    assert_eq!(err, QueryError::ChannelNotReady(DEV.to_string()));

    assert_eq!(harness.engine.readiness("nonexistent-channel"), Readiness::Unknown);
    assert_eq!(harness.engine.readiness(DEV), Readiness::NotReady);
    assert_eq!(harness.engine.readiness(CHANNEL), Readiness::Ready(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_query_returns_empty_page() {
    let harness = ready_harness().await;

    let page = harness.engine.search(CHANNEL, "", None).unwrap();
    assert_eq!(page.total, 0);
    assert!(page.hits.is_empty());
    assert_eq!(page.readiness, Readiness::Ready(1));

    // whitespace counts as empty, and is answered even before the first build
    let page = harness.engine.search(DEV, "  \t ", None).unwrap();
    assert_eq!(page.total, 0);
    assert_eq!(page.readiness, Readiness::NotReady);

    let err = harness.engine.search("nonexistent-channel", "", None).unwrap_err();
    assert!(matches!(err, QueryError::UnknownChannel(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_match_is_not_an_error() {
    let harness = ready_harness().await;
    let page = harness.engine.search(CHANNEL, "zzz-no-such-thing", None).unwrap();
    assert_eq!(page.total, 0);
    assert_eq!(page.sequence(), Some(1));

    let page = harness
        .engine
        .search(CHANNEL, "curl", Some(RecordKind::Option))
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_paging_edges() {
    let harness = TestHarness::new(&[CHANNEL]);
    harness.write_feed(CHANNEL, &json!({}), &generated_packages(25));
    harness.worker.refresh_channel(CHANNEL).await.unwrap();

    let options = SearchOptions::packages_only().with_limit(10);
    let first = harness.engine.search_with(CHANNEL, "pkg", options).unwrap();
    assert_eq!(first.total, 25);
    assert_eq!(first.hits.len(), 10);
    assert!(first.has_more());
    assert_eq!(first.hits[0].record.identity(), "pkg-0000");

    let last = harness
        .engine
        .search_with(CHANNEL, "pkg", options.with_page(2))
        .unwrap();
    assert_eq!(last.hits.len(), 5);
    assert!(!last.has_more());
    assert_eq!(last.hits[4].record.identity(), "pkg-0024");

    let beyond = harness
        .engine
        .search_with(CHANNEL, "pkg", options.with_page(7))
        .unwrap();
    assert_eq!(beyond.total, 25);
    assert!(beyond.hits.is_empty());

    // a zero limit is raised to one
    let single = harness
        .engine
        .search_with(CHANNEL, "pkg", SearchOptions::new().with_limit(0))
        .unwrap();
    assert_eq!(single.hits.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_refresh_of_unknown_channel() {
    let harness = ready_harness().await;
    let err = harness
        .worker
        .refresh_channel("nonexistent-channel")
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownChannel(_)));
    assert!(!harness.registry.contains("nonexistent-channel"));
}
