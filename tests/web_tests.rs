//! The access interceptor in front of the API router.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use logstore::clock::{Clock, MockClock};
use logstore::config::EmitterConfig;
use logstore::pipeline::Emitter;
use logstore::quota::{FixedQuotaQuerier, LogReporter, Quota, QuotaUnit};
use logstore::record::{AccessLogRecord, Protocol};
use logstore::service::Service;
use logstore::storage::MemoryStorage;
use logstore::web::{build_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct App {
    state: AppState,
    storage: Arc<MemoryStorage<AccessLogRecord>>,
}

fn app(main: EmitterConfig, quota: Option<Quota>) -> App {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
    let clock: Arc<dyn Clock> = Arc::new(clock);
    let storage = Arc::new(MemoryStorage::new());
    let service = Service::new(
        clock.clone(),
        vec![Emitter::new("main", clock.clone(), &main, storage.clone())],
        Arc::new(FixedQuotaQuerier::new(quota)),
        Arc::new(LogReporter),
    );

    App {
        state: AppState {
            service: Arc::new(service),
            clock,
        },
        storage,
    }
}

fn quota(amount: u64) -> Quota {
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    Quota {
        unit: QuotaUnit::RequestsAllAuthenticated,
        amount,
        interval: Duration::from_secs(3600),
        limit: true,
        period_start: start,
        period_end: start + chrono::Duration::hours(1),
        notifications: Vec::new(),
    }
}

fn usage_request(instance_id: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/api/usage/{}", instance_id))
        .header("host", "auth.example.com:8080")
        .header("x-instance-id", instance_id)
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_request_is_logged_after_handler() {
    let app = app(EmitterConfig::default(), Some(quota(5)));

    let response = build_router(app.state.clone())
        .oneshot(usage_request("inst-1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["used"], 0);
    assert_eq!(body["remaining"], 5);

    let records = app.storage.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.instance_id, "inst-1");
    assert_eq!(record.protocol, Protocol::Http);
    assert_eq!(record.request_url, "/api/usage/inst-1");
    assert_eq!(record.response_status, 200);
    assert_eq!(record.requested_host, "auth.example.com:8080");
    assert_eq!(record.requested_domain, "auth.example.com");
    assert_eq!(record.request_headers["authorization"], vec!["[REDACTED]".to_string()]);
}

#[tokio::test]
async fn test_exhausted_quota_rejects_without_logging() {
    let app = app(EmitterConfig::default(), Some(quota(2)));
    let router = build_router(app.state.clone());

    for _ in 0..2 {
        let response = router.clone().oneshot(usage_request("inst-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router.clone().oneshot(usage_request("inst-1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"quota for authenticated requests exceeded");

    assert_eq!(app.storage.len(), 2);
}

#[tokio::test]
async fn test_health_is_not_metered() {
    let app = app(EmitterConfig::default(), Some(quota(0)));

    let response = build_router(app.state.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.storage.is_empty());
}

#[tokio::test]
async fn test_sink_failure_does_not_fail_request() {
    let app = app(EmitterConfig::default(), None);
    app.storage.fail_next_bulks(1);

    let response = build_router(app.state.clone())
        .oneshot(usage_request("inst-1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["accounted"], false);
    assert!(body["remaining"].is_null());
    assert!(app.storage.is_empty());
}

#[tokio::test]
async fn test_disabled_pipeline_passes_everything() {
    let app = app(EmitterConfig::disabled(), Some(quota(0)));

    let response = build_router(app.state.clone())
        .oneshot(usage_request("inst-1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.storage.is_empty());
}

#[tokio::test]
async fn test_records_are_timestamped_by_clock() {
    let app = app(EmitterConfig::default(), None);
    let now = app.state.clock.now();

    build_router(app.state.clone())
        .oneshot(usage_request("inst-2"))
        .await
        .unwrap();

    assert_eq!(app.storage.records()[0].timestamp, now);
}
