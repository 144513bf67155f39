mod common;

use common::test_helpers::harness;
use quotaguard::{AdmissionError, AdmissionLayer, BucketId, BucketSpec, CheckReason, Strategy};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[derive(Clone, Debug)]
struct Request {
    tenant: &'static str,
}

#[tokio::test]
async fn tenants_are_limited_independently() {
    let h = harness();
    for tenant in ["acme", "globex"] {
        h.guard
            .configure_bucket(BucketSpec::new("api", tenant, "requests_per_minute", 2, 60, Strategy::FixedWindow))
            .await
            .unwrap();
    }

    let guard = Arc::new(h.guard.clone());
    let svc = ServiceBuilder::new()
        .layer(AdmissionLayer::new(guard, |req: &Request| BucketId::new("api", req.tenant)))
        .service(service_fn(|req: Request| async move { Ok::<_, Infallible>(req.tenant) }));

    for _ in 0..2 {
        assert_eq!(svc.clone().oneshot(Request { tenant: "acme" }).await.unwrap(), "acme");
    }
    let err = svc.clone().oneshot(Request { tenant: "acme" }).await.unwrap_err();
    match err {
        AdmissionError::Denied { retry_after, reason } => {
            assert_eq!(reason, CheckReason::Exhausted);
            assert_eq!(retry_after, Some(Duration::from_secs(60)));
        }
        other => panic!("unexpected: {other:?}"),
    }

    assert_eq!(svc.oneshot(Request { tenant: "globex" }).await.unwrap(), "globex");
    assert_eq!(h.recorder.len().await, 1);
}
