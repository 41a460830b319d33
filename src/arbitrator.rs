//! Acquisition Arbitrator - the single owner of the accepted fix.
//!
//! Candidates arrive from three places, in any interleaving:
//!
//! - the cached head start ([`LocationArbitrator::seed_from_cache`])
//! - the one-shot cascade ([`LocationArbitrator::acquire_initial_fix`],
//!   [`LocationArbitrator::refresh`])
//! - the continuous tracker ([`LocationArbitrator::start_continuous_tracking`])
//!
//! Every candidate goes through the same [`FixReconciler`], which is the only
//! ordering authority. The reconciler sits behind an async mutex that only this
//! type can reach; everyone else sees `Copy` snapshots through `watch`
//! channels.
//!
//! # Usage
//!
//! ```ignore
//! let arbitrator = Arc::new(
//!     LocationArbitrator::new(ip_locator, CachePersister::new(store))
//!         .with_sensor(sensor)
//!         .with_live_broadcast(live),
//! );
//! let _tracking = arbitrator.start_continuous_tracking().await?;
//! let status = arbitrator.acquire_initial_fix().await;
//!
//! let mut rx = arbitrator.subscribe();
//! while rx.changed().await.is_ok() {
//!     let fix = *rx.borrow();
//! }
//! ```

use std::sync::Arc;

use metrics::{counter, gauge};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::CachePersister;
use crate::cascade::{self, AcquisitionPolicy, CascadeOutcome};
use crate::config::LocatorConfig;
use crate::fix::{FixSource, PositionFix};
use crate::live::LiveBroadcaster;
use crate::reconciler::{FixReconciler, Verdict};
use crate::sources::{IpLocator, LocationSensor, SensorError};
use crate::status::AcquisitionStatus;

pub struct LocationArbitrator {
    config: LocatorConfig,
    policy: AcquisitionPolicy,
    sensor: Option<Arc<dyn LocationSensor>>,
    ip_locator: Arc<dyn IpLocator>,
    cache: CachePersister,
    live: Option<LiveBroadcaster>,
    reconciler: Mutex<FixReconciler>,
    position_tx: watch::Sender<Option<PositionFix>>,
    status_tx: watch::Sender<AcquisitionStatus>,
}

impl LocationArbitrator {
    /// Arbitrator without a sensor (IP lookup only) and default config.
    pub fn new(ip_locator: Arc<dyn IpLocator>, cache: CachePersister) -> Self {
        let config = LocatorConfig::default();
        Self {
            policy: AcquisitionPolicy::standard(&config),
            config,
            sensor: None,
            ip_locator,
            cache,
            live: None,
            reconciler: Mutex::new(FixReconciler::new()),
            position_tx: watch::Sender::new(None),
            status_tx: watch::Sender::new(AcquisitionStatus::Locating),
        }
    }

    pub fn with_config(mut self, config: LocatorConfig) -> Self {
        self.policy = AcquisitionPolicy::standard(&config);
        self.config = config;
        self
    }

    /// Replace the fallback order (for tests or unusual platforms).
    pub fn with_policy(mut self, policy: AcquisitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sensor(mut self, sensor: Arc<dyn LocationSensor>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn with_live_broadcast(mut self, live: LiveBroadcaster) -> Self {
        self.live = Some(live);
        self
    }

    /// Current accepted fix, `None` until the first accept.
    pub fn current(&self) -> Option<PositionFix> {
        *self.position_tx.borrow()
    }

    /// Change notification for the accepted fix.
    pub fn subscribe(&self) -> watch::Receiver<Option<PositionFix>> {
        self.position_tx.subscribe()
    }

    pub fn status(&self) -> AcquisitionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AcquisitionStatus> {
        self.status_tx.subscribe()
    }

    /// Seed the accepted fix from a fresh cache record. Only a head start: live
    /// acquisition carries on regardless. Returns whether a fix was seeded.
    pub async fn seed_from_cache(&self) -> bool {
        match self.cache.load_if_fresh().await {
            Some(cached) => self.offer(cached).await.is_accepted(),
            None => false,
        }
    }

    /// Run the one-shot cascade once and settle the status.
    ///
    /// Only permission denial and total exhaustion without any position are
    /// surfaced; everything else is absorbed.
    pub async fn acquire_initial_fix(&self) -> AcquisitionStatus {
        if self.seed_from_cache().await {
            tracing::info!("seeded position from cache");
        }
        if self.current().is_none() {
            self.set_status(AcquisitionStatus::Locating);
        }

        let outcome = cascade::run(
            &self.policy,
            self.sensor.as_deref(),
            self.ip_locator.as_ref(),
        )
        .await;

        let status = match outcome {
            CascadeOutcome::Fix(fix) => {
                self.offer(fix).await;
                AcquisitionStatus::Connected
            }
            CascadeOutcome::PermissionDenied => AcquisitionStatus::permission_denied(),
            CascadeOutcome::Exhausted {
                last_failure,
                saw_permission_denial,
            } => {
                let last = last_failure.map(|f| f.to_string()).unwrap_or_default();
                if self.current().is_some() {
                    tracing::warn!(
                        last_failure = %last,
                        "all sources failed, keeping existing position"
                    );
                    AcquisitionStatus::Connected
                } else {
                    tracing::warn!(last_failure = %last, "all sources failed, no position");
                    AcquisitionStatus::failed(saw_permission_denial)
                }
            }
        };

        self.set_status(status.clone());
        status
    }

    /// Subscribe to the continuous high-accuracy stream. Tracking stops when
    /// the returned guard is stopped or dropped.
    pub async fn start_continuous_tracking(
        self: &Arc<Self>,
    ) -> Result<TrackingGuard, SensorError> {
        let sensor = self.sensor.clone().ok_or(SensorError::Unavailable)?;
        let mut rx = sensor.watch(self.config.watch_request()).await?;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let this = Arc::clone(self);
        let source = self.config.watch_request().fix_source();

        let handle = tokio::spawn(async move {
            tracing::info!(sensor = sensor.name(), "continuous tracking started");
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(Ok(reading)) => {
                            this.on_sensor_fix(reading.into_fix(source)).await;
                        }
                        Some(Err(e)) => tracing::debug!("watch update pending: {e}"),
                        None => {
                            tracing::debug!("sensor stream closed");
                            break;
                        }
                    },
                }
            }
            tracing::info!("continuous tracking stopped");
        });

        Ok(TrackingGuard {
            token,
            handle: Some(handle),
        })
    }

    /// Manual refresh: one high-accuracy request routed through the reconciler.
    pub async fn refresh(&self) -> Result<Verdict, SensorError> {
        let sensor = self.sensor.as_ref().ok_or(SensorError::Unavailable)?;
        let request = self.config.high_accuracy_request();
        match sensor.request_fix(request).await {
            Ok(reading) => Ok(self.on_sensor_fix(reading.into_fix(request.fix_source())).await),
            Err(SensorError::PermissionDenied) => {
                self.set_status(AcquisitionStatus::permission_denied());
                Err(SensorError::PermissionDenied)
            }
            Err(e) => Err(e),
        }
    }

    /// Route a candidate through the reconciler.
    ///
    /// An accepted live fix is written through to the cache and, for signed-in
    /// users, broadcast. A cached seed is neither.
    pub async fn offer(&self, fix: PositionFix) -> Verdict {
        let mut reconciler = self.reconciler.lock().await;
        let verdict = reconciler.apply(fix);

        match verdict {
            Verdict::Accepted(reason) => {
                counter!("locator_fixes_accepted_total", "source" => fix.source.as_str())
                    .increment(1);
                gauge!("locator_last_fix_accuracy_m").set(fix.accuracy_meters);
                tracing::debug!(
                    source = %fix.source,
                    reason = reason.as_str(),
                    latitude = fix.latitude,
                    longitude = fix.longitude,
                    accuracy_m = fix.accuracy_meters,
                    "fix accepted"
                );

                self.position_tx.send_replace(Some(fix));

                if fix.source != FixSource::Cached {
                    self.cache.save(&fix).await;
                    if let Some(live) = &self.live {
                        live.publish(&fix);
                    }
                }
            }
            Verdict::Rejected(reason) => {
                counter!("locator_fixes_rejected_total", "reason" => reason.as_str())
                    .increment(1);
                tracing::trace!(source = %fix.source, reason = reason.as_str(), "fix rejected");
            }
        }

        verdict
    }

    /// A live sensor delivery also proves the signal is back.
    async fn on_sensor_fix(&self, fix: PositionFix) -> Verdict {
        let verdict = self.offer(fix).await;
        if fix.is_valid() {
            self.set_status(AcquisitionStatus::Connected);
        }
        verdict
    }

    fn set_status(&self, status: AcquisitionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            tracing::info!(from = %current, to = %status, "acquisition status");
            *current = status;
            true
        });
    }
}

/// Keeps continuous tracking alive. Stopping or dropping it cancels the
/// subscription exactly once, whether or not a fix was ever delivered.
pub struct TrackingGuard {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TrackingGuard {
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and wait for the tracking task to wind down.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            self.token.cancel();
            if let Err(e) = handle.await {
                tracing::warn!("tracking task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        if self.handle.take().is_some() {
            self.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::reconciler::{AcceptReason, RejectReason};
    use crate::sources::device::DeviceFeedSensor;
    use crate::sources::mock::{ScriptedIpLocator, ScriptedSensor};
    use std::time::Duration;

    fn arbitrator() -> LocationArbitrator {
        LocationArbitrator::new(
            Arc::new(ScriptedIpLocator::new()),
            CachePersister::new(Arc::new(MemoryStore::new())),
        )
    }

    fn fix(lat: f64, lon: f64, acc: f64) -> PositionFix {
        PositionFix::new(lat, lon, Some(acc), 1, FixSource::SensorHighAccuracy)
    }

    #[tokio::test]
    async fn starts_locating_without_position() {
        let arb = arbitrator();
        assert!(arb.current().is_none());
        assert_eq!(arb.status(), AcquisitionStatus::Locating);
    }

    #[tokio::test]
    async fn subscribers_see_accepted_changes_only() {
        let arb = arbitrator();
        let mut rx = arb.subscribe();

        assert_eq!(
            arb.offer(fix(18.62, 73.74, 30.0)).await,
            Verdict::Accepted(AcceptReason::FirstFix)
        );
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert_eq!(
            arb.offer(fix(18.62001, 73.74, 30.0)).await,
            Verdict::Rejected(RejectReason::Jitter)
        );
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn empty_policy_fails_without_position() {
        let arb = arbitrator().with_policy(AcquisitionPolicy::new(vec![]));
        let status = arb.acquire_initial_fix().await;
        assert_eq!(status, AcquisitionStatus::failed(false));
        assert_eq!(arb.status(), status);
    }

    #[tokio::test]
    async fn cascade_keeps_connected_status_when_position_exists() {
        let device = Arc::new(DeviceFeedSensor::new());
        let config = LocatorConfig {
            high_accuracy_timeout_ms: 150,
            low_accuracy_timeout_ms: 150,
            ..LocatorConfig::default()
        };
        let arb = Arc::new(arbitrator().with_config(config).with_sensor(device));
        arb.offer(fix(18.62, 73.74, 20.0)).await;
        arb.set_status(AcquisitionStatus::Connected);

        let running = Arc::clone(&arb);
        let cascade = tokio::spawn(async move { running.acquire_initial_fix().await });

        // The device stays silent, so the cascade is still waiting here.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cascade.is_finished());
        assert_eq!(arb.status(), AcquisitionStatus::Connected);

        assert_eq!(cascade.await.unwrap(), AcquisitionStatus::Connected);
    }

    #[tokio::test]
    async fn refresh_without_sensor_is_unavailable() {
        let arb = arbitrator();
        assert_eq!(arb.refresh().await, Err(SensorError::Unavailable));
    }

    #[tokio::test]
    async fn refresh_routes_through_reconciler() {
        let sensor = Arc::new(ScriptedSensor::new().respond_with([Ok(crate::sources::SensorReading {
            latitude: 18.62,
            longitude: 73.74,
            accuracy_meters: Some(12.0),
            timestamp_millis: 5,
        })]));
        let arb = arbitrator().with_sensor(sensor.clone());

        assert!(arb.refresh().await.unwrap().is_accepted());
        assert_eq!(arb.status(), AcquisitionStatus::Connected);
        assert!(sensor.requests()[0].high_accuracy);
    }

    #[tokio::test]
    async fn refresh_permission_denied_updates_status() {
        let sensor =
            Arc::new(ScriptedSensor::new().respond_with([Err(SensorError::PermissionDenied)]));
        let arb = arbitrator().with_sensor(sensor);
        assert_eq!(arb.refresh().await, Err(SensorError::PermissionDenied));
        assert_eq!(arb.status(), AcquisitionStatus::permission_denied());
    }
}
