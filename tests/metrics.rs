// tests/metrics.rs
use std::sync::Arc;

use axum::body::{self, Body};
use http::{Request, StatusCode};
use tower::ServiceExt;

use safety_locator::cache::{CachePersister, MemoryStore};
use safety_locator::metrics::Metrics;
use safety_locator::sources::mock::{ScriptedIpLocator, ScriptedSensor};
use safety_locator::sources::SensorError;
use safety_locator::{LocationArbitrator, PositionFix};

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let metrics = Metrics::init().expect("recorder installs");
    // Second init reuses the installed recorder.
    Metrics::init().expect("idempotent init");

    let sensor = Arc::new(
        ScriptedSensor::new().respond_with([Err(SensorError::Timeout), Err(SensorError::Timeout)]),
    );
    let arb = LocationArbitrator::new(
        Arc::new(ScriptedIpLocator::answering(18.52, 73.85)),
        CachePersister::new(Arc::new(MemoryStore::failing())),
    )
    .with_sensor(sensor);

    arb.acquire_initial_fix().await;
    // Same point, same accuracy: rejected as jitter.
    arb.offer(PositionFix::from_ip_lookup(18.52, 73.85, 0)).await;

    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .expect("build GET /metrics");
    let resp = metrics.router().oneshot(req).await.expect("oneshot /metrics");
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");

    for series in [
        "locator_fixes_accepted_total",
        "locator_fixes_rejected_total",
        "locator_cascade_step_failures_total",
        "locator_cache_write_failures_total",
        "locator_last_fix_accuracy_m",
    ] {
        assert!(text.contains(series), "missing {series} in:\n{text}");
    }
    assert!(text.contains(r#"source="ip-lookup""#));
    assert!(text.contains(r#"step="high-accuracy""#));
}
