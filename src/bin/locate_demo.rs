//! Demo that walks the acquisition cascade with scripted sources (no network, no device).

use std::sync::Arc;

use safety_locator::cache::{CachePersister, MemoryStore};
use safety_locator::sources::mock::{ScriptedIpLocator, ScriptedSensor};
use safety_locator::sources::SensorError;
use safety_locator::LocationArbitrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safety_locator=debug,info".into()),
        )
        .init();

    // High accuracy times out, low accuracy times out, IP lookup answers.
    let sensor = Arc::new(
        ScriptedSensor::new().respond_with([Err(SensorError::Timeout), Err(SensorError::Timeout)]),
    );
    let ip = Arc::new(ScriptedIpLocator::answering(18.5204, 73.8567));
    let store = Arc::new(MemoryStore::new());

    let locator = LocationArbitrator::new(ip, CachePersister::new(store.clone()))
        .with_sensor(sensor.clone());

    let status = locator.acquire_initial_fix().await;
    println!("status: {status}");
    if let Some(fix) = locator.current() {
        println!(
            "position: {:.4}, {:.4} (+/- {} m, {})",
            fix.latitude, fix.longitude, fix.accuracy_meters, fix.source
        );
    }
    println!("sensor requests: {}", sensor.requests().len());
    println!("cache writes: {}", store.write_count());

    println!("locate-demo done");
    Ok(())
}
