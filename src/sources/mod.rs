// src/sources/mod.rs
//! Location sources consumed by the arbitrator.
//!
//! - [`LocationSensor`] - one-shot and continuous position requests
//! - [`IpLocator`] - coarse IP-address geolocation
//!
//! Concrete sources: [`device::DeviceFeedSensor`] (readings pushed by the
//! client device), [`ipapi::IpApiLocator`] (HTTP lookup) and the scripted
//! sources in [`mock`].

pub mod device;
pub mod ipapi;
pub mod mock;

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::fix::{FixSource, PositionFix};

/// Options for a sensor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorRequest {
    pub high_accuracy: bool,
    /// Bounded wait for a one-shot answer.
    pub timeout: Duration,
    /// How old a remembered reading may be and still be returned (zero: never).
    pub max_cached_age: Duration,
}

impl SensorRequest {
    pub fn high_accuracy(timeout: Duration) -> Self {
        Self {
            high_accuracy: true,
            timeout,
            max_cached_age: Duration::ZERO,
        }
    }

    pub fn low_accuracy(timeout: Duration, max_cached_age: Duration) -> Self {
        Self {
            high_accuracy: false,
            timeout,
            max_cached_age,
        }
    }

    /// Tag for fixes produced by this request.
    pub fn fix_source(&self) -> FixSource {
        if self.high_accuracy {
            FixSource::SensorHighAccuracy
        } else {
            FixSource::SensorLowAccuracy
        }
    }
}

/// Raw sensor answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub latitude: f64,
    pub longitude: f64,
    /// Some sensors cannot report accuracy.
    #[serde(default)]
    pub accuracy_meters: Option<f64>,
    /// Capture time, unix epoch milliseconds.
    pub timestamp_millis: i64,
}

impl SensorReading {
    pub fn into_fix(self, source: FixSource) -> PositionFix {
        PositionFix::new(
            self.latitude,
            self.longitude,
            self.accuracy_meters,
            self.timestamp_millis,
            source,
        )
    }
}

/// Failure codes of the sensor service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    Unavailable,
    #[error("timed out waiting for a position")]
    Timeout,
}

pub type SensorResult = std::result::Result<SensorReading, SensorError>;

/// Platform location sensor.
#[async_trait::async_trait]
pub trait LocationSensor: Send + Sync {
    /// One-shot request, resolves within `request.timeout` or fails.
    async fn request_fix(&self, request: SensorRequest) -> SensorResult;

    /// Continuous stream of readings. Dropping the receiver unsubscribes.
    async fn watch(
        &self,
        request: SensorRequest,
    ) -> std::result::Result<mpsc::Receiver<SensorResult>, SensorError>;

    fn name(&self) -> &'static str;
}

/// Answer of an IP geolocation lookup (no accuracy available).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IpLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait::async_trait]
pub trait IpLocator: Send + Sync {
    async fn lookup(&self) -> Result<IpLocation>;
    fn name(&self) -> &'static str;
}
