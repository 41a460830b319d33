// tests/cascade_fallback.rs
//
// One-shot acquisition cascade driven through the arbitrator with scripted
// sources: fallback order, permission denial, exhaustion.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use safety_locator::cache::{CachePersister, MemoryStore, CACHE_KEY};
use safety_locator::fix::IP_LOOKUP_ACCURACY_M;
use safety_locator::sources::mock::{ScriptedIpLocator, ScriptedSensor};
use safety_locator::sources::{SensorError, SensorReading};
use safety_locator::status::{CHECK_PERMISSIONS_MESSAGE, SIGNAL_UNAVAILABLE_MESSAGE};
use safety_locator::{AcquisitionStatus, FixSource, LocationArbitrator};

fn reading(lat: f64, lon: f64, acc: f64) -> SensorReading {
    SensorReading {
        latitude: lat,
        longitude: lon,
        accuracy_meters: Some(acc),
        timestamp_millis: Utc::now().timestamp_millis(),
    }
}

fn arbitrator(
    sensor: &Arc<ScriptedSensor>,
    ip: &Arc<ScriptedIpLocator>,
    store: &Arc<MemoryStore>,
) -> LocationArbitrator {
    LocationArbitrator::new(ip.clone(), CachePersister::new(store.clone()))
        .with_sensor(sensor.clone())
}

#[tokio::test]
async fn falls_back_high_then_low_then_ip() {
    let sensor = Arc::new(
        ScriptedSensor::new().respond_with([Err(SensorError::Timeout), Err(SensorError::Timeout)]),
    );
    let ip = Arc::new(ScriptedIpLocator::answering(18.5204, 73.8567));
    let store = Arc::new(MemoryStore::new());
    let arb = arbitrator(&sensor, &ip, &store);

    let status = arb.acquire_initial_fix().await;
    assert_eq!(status, AcquisitionStatus::Connected);

    let fix = arb.current().expect("ip fix accepted");
    assert_eq!(fix.source, FixSource::IpLookup);
    assert_eq!(fix.accuracy_meters, IP_LOOKUP_ACCURACY_M);

    let reqs = sensor.requests();
    assert_eq!(reqs.len(), 2);
    assert!(reqs[0].high_accuracy);
    assert!(!reqs[1].high_accuracy);
    assert_eq!(ip.calls(), 1);
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn high_accuracy_success_skips_the_rest() {
    let sensor = Arc::new(ScriptedSensor::new().respond_with([Ok(reading(18.62, 73.7474, 6.0))]));
    let ip = Arc::new(ScriptedIpLocator::answering(0.0, 0.0));
    let store = Arc::new(MemoryStore::new());
    let arb = arbitrator(&sensor, &ip, &store);

    assert_eq!(arb.acquire_initial_fix().await, AcquisitionStatus::Connected);
    assert_eq!(arb.current().map(|f| f.source), Some(FixSource::SensorHighAccuracy));
    assert_eq!(sensor.requests().len(), 1);
    assert_eq!(ip.calls(), 0);
}

#[tokio::test]
async fn permission_denied_stops_the_cascade() {
    let sensor = Arc::new(ScriptedSensor::new().respond_with([Err(SensorError::PermissionDenied)]));
    let ip = Arc::new(ScriptedIpLocator::answering(18.52, 73.85));
    let store = Arc::new(MemoryStore::new());
    let arb = arbitrator(&sensor, &ip, &store);

    let status = arb.acquire_initial_fix().await;
    assert_eq!(status, AcquisitionStatus::permission_denied());
    assert_eq!(arb.status(), status);
    assert!(arb.current().is_none());
    assert_eq!(sensor.requests().len(), 1);
    assert_eq!(ip.calls(), 0);
}

#[tokio::test]
async fn exhaustion_without_position_fails_with_signal_message() {
    let sensor = Arc::new(
        ScriptedSensor::new()
            .respond_with([Err(SensorError::Timeout), Err(SensorError::Unavailable)]),
    );
    let ip = Arc::new(ScriptedIpLocator::failing("network down"));
    let store = Arc::new(MemoryStore::new());
    let arb = arbitrator(&sensor, &ip, &store);

    let status = arb.acquire_initial_fix().await;
    assert_eq!(status.message(), Some(SIGNAL_UNAVAILABLE_MESSAGE));
    assert_eq!(status.as_str(), "failed");
    assert!(arb.current().is_none());
}

#[tokio::test]
async fn denial_on_fallback_step_mentions_permissions() {
    let sensor = Arc::new(
        ScriptedSensor::new().respond_with([
            Err(SensorError::Timeout),
            Err(SensorError::PermissionDenied),
        ]),
    );
    let ip = Arc::new(ScriptedIpLocator::failing("rate limited"));
    let store = Arc::new(MemoryStore::new());
    let arb = arbitrator(&sensor, &ip, &store);

    let status = arb.acquire_initial_fix().await;
    assert_eq!(status.message(), Some(CHECK_PERMISSIONS_MESSAGE));
    assert_eq!(ip.calls(), 1);
}

#[tokio::test]
async fn exhaustion_with_cached_seed_stays_connected() {
    let record = json!({
        "latitude": 18.62,
        "longitude": 73.7474,
        "accuracyMeters": 40.0,
        "acquiredAtEpochMillis": Utc::now().timestamp_millis() - 5_000,
    })
    .to_string();
    let sensor = Arc::new(ScriptedSensor::new());
    let ip = Arc::new(ScriptedIpLocator::failing("offline"));
    let store = Arc::new(MemoryStore::new().with_entry(CACHE_KEY, &record));
    let arb = arbitrator(&sensor, &ip, &store);

    assert_eq!(arb.acquire_initial_fix().await, AcquisitionStatus::Connected);
    assert_eq!(arb.current().map(|f| f.source), Some(FixSource::Cached));
}

#[tokio::test]
async fn no_sensor_goes_straight_to_ip() {
    let ip = Arc::new(ScriptedIpLocator::answering(18.52, 73.85));
    let arb = LocationArbitrator::new(
        ip.clone(),
        CachePersister::new(Arc::new(MemoryStore::new())),
    );

    assert_eq!(arb.acquire_initial_fix().await, AcquisitionStatus::Connected);
    assert_eq!(arb.current().map(|f| f.source), Some(FixSource::IpLookup));
}

#[tokio::test]
async fn ip_fix_with_invalid_body_is_not_accepted() {
    let ip = Arc::new(ScriptedIpLocator::answering(f64::NAN, 73.85));
    let arb = LocationArbitrator::new(ip, CachePersister::new(Arc::new(MemoryStore::new())));

    let status = arb.acquire_initial_fix().await;
    assert_eq!(status.as_str(), "failed");
    assert!(arb.current().is_none());
}
