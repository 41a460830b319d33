//! Device feed sensor.
//!
//! The service has no positioning hardware of its own: the client device
//! pushes readings (and sensor errors) over HTTP and this type turns them into
//! the one-shot / continuous request model the arbitrator expects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};

use super::{LocationSensor, SensorError, SensorReading, SensorRequest, SensorResult};

const EVENT_CAPACITY: usize = 64;
const WATCH_CAPACITY: usize = 16;

pub struct DeviceFeedSensor {
    events: broadcast::Sender<SensorResult>,
    last_reading: Mutex<Option<SensorReading>>,
    permission_denied: AtomicBool,
}

impl Default for DeviceFeedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceFeedSensor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            events,
            last_reading: Mutex::new(None),
            permission_denied: AtomicBool::new(false),
        }
    }

    /// A reading from the device. Also clears a previous permission denial.
    pub fn push_reading(&self, reading: SensorReading) {
        self.permission_denied.store(false, Ordering::SeqCst);
        *self.last_reading.lock().expect("device feed mutex poisoned") = Some(reading);
        // No listeners is fine: the reading is remembered for cached-age requests.
        let _ = self.events.send(Ok(reading));
    }

    /// A sensor error reported by the device.
    pub fn push_error(&self, error: SensorError) {
        if error == SensorError::PermissionDenied {
            self.permission_denied.store(true, Ordering::SeqCst);
        }
        let _ = self.events.send(Err(error));
    }

    pub fn last_reading(&self) -> Option<SensorReading> {
        *self.last_reading.lock().expect("device feed mutex poisoned")
    }

    fn remembered_within(&self, request: &SensorRequest, now_ms: i64) -> Option<SensorReading> {
        if request.max_cached_age.is_zero() {
            return None;
        }
        let reading = self.last_reading()?;
        let age = now_ms.saturating_sub(reading.timestamp_millis);
        (age >= 0 && (age as u128) <= request.max_cached_age.as_millis()).then_some(reading)
    }
}

async fn next_event(rx: &mut broadcast::Receiver<SensorResult>) -> SensorResult {
    loop {
        match rx.recv().await {
            Ok(event) => return event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "device feed lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return Err(SensorError::Unavailable),
        }
    }
}

#[async_trait::async_trait]
impl LocationSensor for DeviceFeedSensor {
    async fn request_fix(&self, request: SensorRequest) -> SensorResult {
        if self.permission_denied.load(Ordering::SeqCst) {
            return Err(SensorError::PermissionDenied);
        }
        // Subscribe before consulting the remembered reading so a concurrent push
        // lands in one of the two.
        let mut rx = self.events.subscribe();
        if let Some(reading) = self.remembered_within(&request, Utc::now().timestamp_millis()) {
            return Ok(reading);
        }

        match tokio::time::timeout(request.timeout, next_event(&mut rx)).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::Timeout),
        }
    }

    /// Continuous stream. A silence longer than `request.timeout` yields
    /// `TIMEOUT` and the stream keeps going; a zero timeout never fires.
    async fn watch(
        &self,
        request: SensorRequest,
    ) -> Result<mpsc::Receiver<SensorResult>, SensorError> {
        if self.permission_denied.load(Ordering::SeqCst) {
            return Err(SensorError::PermissionDenied);
        }

        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let silence = (!request.timeout.is_zero()).then_some(request.timeout);
        tokio::spawn(async move {
            loop {
                let next = async {
                    match silence {
                        Some(limit) => tokio::time::timeout(limit, events.recv()).await.ok(),
                        None => Some(events.recv().await),
                    }
                };
                let item = tokio::select! {
                    _ = tx.closed() => break,
                    event = next => match event {
                        None => Err(SensorError::Timeout),
                        Some(Ok(item)) => item,
                        Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                            tracing::debug!(skipped, "device watch lagged");
                            continue;
                        }
                        Some(Err(broadcast::error::RecvError::Closed)) => break,
                    },
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            tracing::debug!("device watch unsubscribed");
        });
        Ok(rx)
    }

    fn name(&self) -> &'static str {
        "device-feed"
    }
}
