// tests/cache_freshness.rs
//
// Cached head start: freshness boundary, file-backed store, and how a cached
// seed interacts with the arbitrator.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use safety_locator::cache::{CachePersister, FileStore, MemoryStore, CACHE_FRESHNESS_MS, CACHE_KEY};
use safety_locator::sources::mock::ScriptedIpLocator;
use safety_locator::{FixSource, LocationArbitrator, PositionFix};

fn record_at(acquired_at: i64) -> String {
    json!({
        "latitude": 18.62,
        "longitude": 73.7474,
        "accuracyMeters": 25.0,
        "acquiredAtEpochMillis": acquired_at,
    })
    .to_string()
}

#[tokio::test]
async fn freshness_boundary_is_strict() {
    let now = 1_700_000_000_000_i64;

    let fresh = CachePersister::new(Arc::new(
        MemoryStore::new().with_entry(CACHE_KEY, &record_at(now - 299_999)),
    ));
    let loaded = fresh.load_if_fresh_at(now).await.expect("just inside the window");
    assert_eq!(loaded.source, FixSource::Cached);

    let stale = CachePersister::new(Arc::new(
        MemoryStore::new().with_entry(CACHE_KEY, &record_at(now - 300_001)),
    ));
    assert!(stale.load_if_fresh_at(now).await.is_none());

    let exact = CachePersister::new(Arc::new(
        MemoryStore::new().with_entry(CACHE_KEY, &record_at(now - CACHE_FRESHNESS_MS)),
    ));
    assert!(exact.load_if_fresh_at(now).await.is_none());
}

#[tokio::test]
async fn custom_freshness_window() {
    let now = 10_000_i64;
    let cache = CachePersister::new(Arc::new(
        MemoryStore::new().with_entry(CACHE_KEY, &record_at(now - 2_000)),
    ))
    .with_freshness_ms(1_000);
    assert!(cache.load_if_fresh_at(now).await.is_none());
}

#[tokio::test]
async fn file_store_survives_a_restart() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = tmp.path().join("state");
    let fix = PositionFix::new(
        18.62,
        73.7474,
        Some(9.0),
        Utc::now().timestamp_millis(),
        FixSource::SensorHighAccuracy,
    );

    let first = CachePersister::new(Arc::new(FileStore::new(&dir)));
    assert!(first.save(&fix).await);
    assert!(dir.join("location_cache.json").exists());

    // New persister over the same directory, as after an app restart.
    let second = CachePersister::new(Arc::new(FileStore::new(&dir)));
    let loaded = second.load_if_fresh().await.expect("fresh file record");
    assert_eq!(loaded.coordinates(), fix.coordinates());
    assert_eq!(loaded.source, FixSource::Cached);
}

#[tokio::test]
async fn file_store_missing_file_is_absent() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cache = CachePersister::new(Arc::new(FileStore::new(tmp.path())));
    assert!(cache.load_if_fresh().await.is_none());
}

#[tokio::test]
async fn cached_seed_is_not_written_back() {
    let store = Arc::new(
        MemoryStore::new().with_entry(CACHE_KEY, &record_at(Utc::now().timestamp_millis() - 1_000)),
    );
    let arb = LocationArbitrator::new(
        Arc::new(ScriptedIpLocator::new()),
        CachePersister::new(store.clone()),
    );

    assert!(arb.seed_from_cache().await);
    let seeded = arb.current().expect("seeded");
    assert_eq!(seeded.source, FixSource::Cached);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn live_fix_supersedes_cached_seed_when_moved() {
    let store = Arc::new(
        MemoryStore::new().with_entry(CACHE_KEY, &record_at(Utc::now().timestamp_millis() - 1_000)),
    );
    let arb = LocationArbitrator::new(
        Arc::new(ScriptedIpLocator::new()),
        CachePersister::new(store.clone()),
    );
    arb.seed_from_cache().await;

    let live = PositionFix::new(18.63, 73.7474, Some(25.0), 1, FixSource::SensorHighAccuracy);
    assert!(arb.offer(live).await.is_accepted());
    assert_eq!(arb.current().map(|f| f.source), Some(FixSource::SensorHighAccuracy));
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn stale_cache_does_not_seed() {
    let store = Arc::new(MemoryStore::new().with_entry(CACHE_KEY, &record_at(0)));
    let arb = LocationArbitrator::new(
        Arc::new(ScriptedIpLocator::new()),
        CachePersister::new(store),
    );
    assert!(!arb.seed_from_cache().await);
    assert!(arb.current().is_none());
}
