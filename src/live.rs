//! Live-coordinates broadcast.
//!
//! Each accepted fix of an authenticated user is published to a shared
//! per-user record so other users can observe it. Publishing is
//! fire-and-forget: a failure is logged and counted, never retried and never
//! surfaced; the next accepted fix overwrites the record anyway.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::counter;
use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::fix::PositionFix;

/// Who is signed in, if anyone.
pub trait UserIdentity: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Fixed identity resolved at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    pub fn new(user_id: Option<String>) -> Self {
        Self { user_id }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl UserIdentity for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// Body of the shared live-position record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiveCoordinates {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    /// Publish time, unix epoch milliseconds.
    pub timestamp: i64,
}

impl LiveCoordinates {
    pub fn from_fix(fix: &PositionFix, now_ms: i64) -> Self {
        Self {
            lat: fix.latitude,
            lng: fix.longitude,
            accuracy: fix.accuracy_meters,
            timestamp: now_ms,
        }
    }
}

#[async_trait::async_trait]
pub trait LivePositionStore: Send + Sync {
    async fn write(&self, user_id: &str, coords: &LiveCoordinates) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Realtime database REST store: `PUT {base}/users/{uid}/live_coords.json`.
#[derive(Clone)]
pub struct RealtimeDbStore {
    base_url: String,
    auth_token: Option<String>,
    client: Client,
}

impl RealtimeDbStore {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("build live store client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            client,
        })
    }

    pub fn record_url(&self, user_id: &str) -> String {
        format!("{}/users/{}/live_coords.json", self.base_url, user_id)
    }
}

#[async_trait::async_trait]
impl LivePositionStore for RealtimeDbStore {
    async fn write(&self, user_id: &str, coords: &LiveCoordinates) -> Result<()> {
        let mut req = self.client.put(self.record_url(user_id)).json(coords);
        if let Some(token) = &self.auth_token {
            req = req.query(&[("auth", token)]);
        }
        req.send()
            .await
            .context("live coords put")?
            .error_for_status()
            .context("live coords non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "realtime-db"
    }
}

/// Records writes in memory; `failing()` rejects every write.
#[derive(Debug, Default)]
pub struct MemoryLiveStore {
    writes: Mutex<Vec<(String, LiveCoordinates)>>,
    fail: bool,
}

impl MemoryLiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<(String, LiveCoordinates)> {
        self.writes
            .lock()
            .expect("live store mutex poisoned")
            .clone()
    }
}

#[async_trait::async_trait]
impl LivePositionStore for MemoryLiveStore {
    async fn write(&self, user_id: &str, coords: &LiveCoordinates) -> Result<()> {
        if self.fail {
            anyhow::bail!("permission denied by database rules");
        }
        self.writes
            .lock()
            .expect("live store mutex poisoned")
            .push((user_id.to_string(), *coords));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct LiveBroadcaster {
    identity: Arc<dyn UserIdentity>,
    store: Arc<dyn LivePositionStore>,
}

impl LiveBroadcaster {
    pub fn new(identity: Arc<dyn UserIdentity>, store: Arc<dyn LivePositionStore>) -> Self {
        Self { identity, store }
    }

    /// Publish `fix` in the background. `None` when nobody is signed in.
    ///
    /// The handle is only useful to tests; callers normally drop it.
    pub fn publish(&self, fix: &PositionFix) -> Option<JoinHandle<()>> {
        let Some(user_id) = self.identity.current_user_id() else {
            tracing::trace!("live broadcast skipped: unauthenticated");
            return None;
        };

        let coords = LiveCoordinates::from_fix(fix, Utc::now().timestamp_millis());
        let store = Arc::clone(&self.store);
        Some(tokio::spawn(async move {
            if let Err(e) = store.write(&user_id, &coords).await {
                counter!("locator_live_publish_failures_total").increment(1);
                tracing::warn!(store = store.name(), "coord sync failed: {e:#}");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::FixSource;

    fn fix() -> PositionFix {
        PositionFix::new(18.62, 73.7474, Some(7.5), 10, FixSource::SensorHighAccuracy)
    }

    #[test]
    fn record_url_layout() {
        let store = RealtimeDbStore::new("https://example-db.test/", None).unwrap();
        assert_eq!(
            store.record_url("abc"),
            "https://example-db.test/users/abc/live_coords.json"
        );
    }

    #[test]
    fn coords_use_short_field_names() {
        let v = serde_json::to_value(LiveCoordinates::from_fix(&fix(), 99)).unwrap();
        assert_eq!(v["lat"], 18.62);
        assert_eq!(v["lng"], 73.7474);
        assert_eq!(v["accuracy"], 7.5);
        assert_eq!(v["timestamp"], 99);
    }

    #[tokio::test]
    async fn anonymous_user_publishes_nothing() {
        let store = Arc::new(MemoryLiveStore::new());
        let live = LiveBroadcaster::new(Arc::new(StaticIdentity::anonymous()), store.clone());
        assert!(live.publish(&fix()).is_none());
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn signed_in_user_publishes_keyed_record() {
        let store = Arc::new(MemoryLiveStore::new());
        let identity = Arc::new(StaticIdentity::new(Some("u1".into())));
        let live = LiveBroadcaster::new(identity, store.clone());

        live.publish(&fix()).expect("spawned").await.unwrap();
        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "u1");
        assert_eq!(writes[0].1.lat, 18.62);
    }

    #[tokio::test]
    async fn failed_publish_does_not_panic() {
        let identity = Arc::new(StaticIdentity::new(Some("u1".into())));
        let live = LiveBroadcaster::new(identity, Arc::new(MemoryLiveStore::failing()));
        live.publish(&fix()).expect("spawned").await.unwrap();
    }
}
