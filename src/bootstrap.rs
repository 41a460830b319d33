//! Service wiring: config -> sources -> arbitrator -> router.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;

use crate::api::{self, AppState};
use crate::arbitrator::LocationArbitrator;
use crate::cache::{CachePersister, FileStore};
use crate::config::LocatorConfig;
use crate::live::{LiveBroadcaster, RealtimeDbStore, StaticIdentity};
use crate::metrics::Metrics;
use crate::nearby::{self, SafetyNode};
use crate::sources::device::DeviceFeedSensor;
use crate::sources::ipapi::IpApiLocator;

pub async fn build_app(cfg: LocatorConfig) -> Result<Router> {
    let metrics = Metrics::init()?;

    let device = Arc::new(DeviceFeedSensor::new());
    let ip_locator = Arc::new(IpApiLocator::new(cfg.ip_lookup_url.clone())?);
    let store = FileStore::new(cfg.cache_dir.clone());
    tracing::info!(
        ip_lookup = ip_locator.url(),
        cache_dir = %store.dir().display(),
        "location sources configured"
    );
    let cache = CachePersister::new(Arc::new(store)).with_freshness_ms(cfg.cache_freshness_ms);

    let mut locator = LocationArbitrator::new(ip_locator, cache)
        .with_config(cfg.clone())
        .with_sensor(device.clone());

    if let Some(url) = &cfg.live_store_url {
        let store = RealtimeDbStore::new(url.clone(), cfg.live_store_auth.clone())
            .context("live store")?;
        let identity = StaticIdentity::new(cfg.user_id.clone());
        locator = locator.with_live_broadcast(LiveBroadcaster::new(
            Arc::new(identity),
            Arc::new(store),
        ));
        tracing::info!(url = %url, signed_in = cfg.user_id.is_some(), "live broadcast configured");
    }

    let locator = Arc::new(locator);

    let tracking = match locator.start_continuous_tracking().await {
        Ok(guard) => Some(Arc::new(guard)),
        Err(e) => {
            tracing::warn!("continuous tracking not started: {e}");
            None
        }
    };

    let initial = Arc::clone(&locator);
    tokio::spawn(async move {
        let status = initial.acquire_initial_fix().await;
        tracing::info!(status = %status, "initial acquisition finished");
    });

    let state = AppState {
        locator,
        device: Some(device),
        nodes: Arc::new(load_nodes_or_empty(&cfg)),
        tracking,
    };

    Ok(api::create_router(state).merge(metrics.router()))
}

fn load_nodes_or_empty(cfg: &LocatorConfig) -> Vec<SafetyNode> {
    let Some(path) = &cfg.nodes_path else {
        return Vec::new();
    };
    if !path.exists() {
        tracing::warn!(path = %path.display(), "safety nodes file missing, serving none");
        return Vec::new();
    }
    match nearby::load_nodes(path) {
        Ok(nodes) => {
            tracing::info!(count = nodes.len(), "safety nodes loaded");
            nodes
        }
        Err(e) => {
            tracing::warn!("safety nodes not loaded: {e:#}");
            Vec::new()
        }
    }
}
