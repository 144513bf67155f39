mod common;

use common::test_helpers::{harness, harness_with};
use quotaguard::{BucketSpec, CheckReason, EventFilter, EventType, GuardConfig, Strategy};
use std::time::Duration;

fn api_bucket(limit: u64, window: u64) -> BucketSpec {
    BucketSpec::new("api", "tenant-1", "requests_per_minute", limit, window, Strategy::TokenBucket)
}

#[tokio::test]
async fn hundred_fifty_sequential_checks() {
    let h = harness();
    let id = h.guard.configure_bucket(api_bucket(100, 60)).await.unwrap();
    assert_eq!(id.to_string(), "api/tenant-1");

    let mut allowed = 0;
    let mut denied = 0;
    let mut last = None;
    for _ in 0..150 {
        let outcome = h.guard.check(&id, 1).await.unwrap();
        if outcome.allowed {
            allowed += 1;
        } else {
            denied += 1;
            assert_eq!(outcome.reason, CheckReason::Exhausted);
        }
        last = Some(outcome);
    }

    assert_eq!(allowed, 100);
    assert_eq!(denied, 50);
    assert_eq!(last.unwrap().tokens_remaining, 0);

    let events = h
        .guard
        .list_events(&EventFilter::new().event_type(EventType::RateLimitExceeded))
        .await
        .unwrap();
    assert_eq!(events.len(), 50);

    let bucket = h.guard.get_bucket(&id).await.unwrap();
    assert!(bucket.invariants_hold());
    assert_eq!(bucket.requests_made, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_checks_never_double_spend() {
    let h = harness_with(GuardConfig { max_conflict_retries: 256, ..GuardConfig::default() });
    let id = h.guard.configure_bucket(api_bucket(10, 60)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let guard = h.guard.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move { guard.check(&id, 1).await }));
    }

    let mut allowed = 0;
    let mut denied = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.allowed {
            allowed += 1;
        } else {
            assert_eq!(outcome.reason, CheckReason::Exhausted);
            denied += 1;
        }
    }

    assert_eq!(allowed, 10);
    assert_eq!(denied, 40);
    let bucket = h.guard.get_bucket(&id).await.unwrap();
    assert_eq!(bucket.tokens_remaining(), 0);
    assert_eq!(bucket.requests_made, 10);
    assert!(bucket.invariants_hold());
}

#[tokio::test]
async fn full_window_refills_to_capacity() {
    let h = harness();
    let id = h.guard.configure_bucket(api_bucket(10, 60)).await.unwrap();
    for _ in 0..10 {
        assert!(h.guard.check(&id, 1).await.unwrap().allowed);
    }
    assert!(!h.guard.check(&id, 1).await.unwrap().allowed);

    // half a window refills half the bucket
    h.clock.advance(chrono::Duration::seconds(30));
    let outcome = h.guard.check(&id, 1).await.unwrap();
    assert!(outcome.allowed);
    assert_eq!(outcome.tokens_remaining, 4);

    // long idle periods cap at the limit
    h.clock.advance(chrono::Duration::hours(3));
    let outcome = h.guard.check(&id, 1).await.unwrap();
    assert!(outcome.allowed);
    assert_eq!(outcome.tokens_remaining, 9);
    let bucket = h.guard.get_bucket(&id).await.unwrap();
    assert!(bucket.current_tokens <= 10.0);
}

#[tokio::test]
async fn sliding_window_counts_previous_window() {
    let h = harness();
    let mut spec = api_bucket(10, 10);
    spec.strategy = Strategy::SlidingWindow;
    let id = h.guard.configure_bucket(spec).await.unwrap();

    for _ in 0..10 {
        assert!(h.guard.check(&id, 1).await.unwrap().allowed);
    }

    // 5s into the next window half of the previous usage still counts
    h.clock.advance(chrono::Duration::seconds(15));
    let mut allowed = 0;
    while h.guard.check(&id, 1).await.unwrap().allowed {
        allowed += 1;
    }
    assert_eq!(allowed, 5);
}

#[tokio::test]
async fn cooldown_blocks_until_it_expires() {
    let h = harness_with(GuardConfig { cooldown_secs: Some(300), ..GuardConfig::default() });
    let id = h.guard.configure_bucket(api_bucket(1, 60)).await.unwrap();

    assert!(h.guard.check(&id, 1).await.unwrap().allowed);
    let denied = h.guard.check(&id, 1).await.unwrap();
    assert_eq!(denied.reason, CheckReason::Exhausted);
    assert_eq!(denied.retry_after, Some(Duration::from_secs(300)));

    h.clock.advance(chrono::Duration::seconds(120));
    let blocked = h.guard.check(&id, 1).await.unwrap();
    assert!(!blocked.allowed);
    assert_eq!(blocked.reason, CheckReason::Blocked);
    assert_eq!(blocked.retry_after, Some(Duration::from_secs(180)));

    h.clock.advance(chrono::Duration::seconds(180));
    assert!(h.guard.check(&id, 1).await.unwrap().allowed);

    // only the first denial produced an event
    assert_eq!(h.recorder.len().await, 1);
}

#[tokio::test]
async fn offline_store_uses_failure_policy() {
    let h = harness();
    let id = h.guard.configure_bucket(api_bucket(5, 60)).await.unwrap();
    h.store.set_available(false);

    let closed = h.guard.check(&id, 1).await.unwrap();
    assert!(!closed.allowed);
    assert_eq!(closed.reason, CheckReason::StoreUnavailable);

    h.guard
        .update_config(|c| GuardConfig { failure_policy: quotaguard::FailurePolicy::Open, ..c.clone() })
        .unwrap();
    let open = h.guard.check(&id, 1).await.unwrap();
    assert!(open.allowed);
    assert_eq!(open.reason, CheckReason::StoreUnavailable);

    h.store.set_available(true);
    let bucket = h.guard.get_bucket(&id).await.unwrap();
    assert_eq!(bucket.requests_made, 0);
}
