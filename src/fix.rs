//! # Position fixes
//! A fix is a single location reading: coordinates, a declared uncertainty
//! radius, the capture time and the source that produced it.
//!
//! Accuracy and distance drive every decision downstream; the source tag is
//! kept for diagnostics only.

use serde::{Deserialize, Serialize};

/// Accuracy assigned when a source reports none (or reports garbage).
/// Large enough to rank as low confidence, never zero.
pub const UNKNOWN_ACCURACY_M: f64 = 100_000.0;

/// Accuracy assigned to IP-derived fixes (roughly city level).
pub const IP_LOOKUP_ACCURACY_M: f64 = 5_000.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Where a fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixSource {
    SensorHighAccuracy,
    SensorLowAccuracy,
    IpLookup,
    Cached,
}

impl FixSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SensorHighAccuracy => "sensor-high-accuracy",
            Self::SensorLowAccuracy => "sensor-low-accuracy",
            Self::IpLookup => "ip-lookup",
            Self::Cached => "cached",
        }
    }
}

impl std::fmt::Display for FixSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate or accepted location reading.
///
/// `Copy` on purpose: consumers always get their own snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Uncertainty radius in meters (lower is better).
    pub accuracy_meters: f64,
    /// Capture time, unix epoch milliseconds.
    pub acquired_at_epoch_millis: i64,
    pub source: FixSource,
}

impl PositionFix {
    /// Build a fix. A missing, negative or non-finite accuracy becomes
    /// [`UNKNOWN_ACCURACY_M`].
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy_meters: Option<f64>,
        acquired_at_epoch_millis: i64,
        source: FixSource,
    ) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: sanitize_accuracy(accuracy_meters),
            acquired_at_epoch_millis,
            source,
        }
    }

    /// Synthesize a fix from an IP geolocation answer.
    pub fn from_ip_lookup(latitude: f64, longitude: f64, acquired_at_epoch_millis: i64) -> Self {
        Self::new(
            latitude,
            longitude,
            Some(IP_LOOKUP_ACCURACY_M),
            acquired_at_epoch_millis,
            FixSource::IpLookup,
        )
    }

    /// Both coordinates finite (rules out NaN and infinities).
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    pub fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    /// Milliseconds elapsed between capture and `now_ms` (negative if the
    /// capture time lies in the future).
    pub fn age_millis(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.acquired_at_epoch_millis)
    }

    /// True if either axis differs from `other` by more than `delta_deg`.
    ///
    /// 0.00005° is ~5.5 m at the equator.
    pub fn moved_from(&self, other: &PositionFix, delta_deg: f64) -> bool {
        (self.latitude - other.latitude).abs() > delta_deg
            || (self.longitude - other.longitude).abs() > delta_deg
    }
}

fn sanitize_accuracy(accuracy: Option<f64>) -> f64 {
    match accuracy {
        Some(a) if a.is_finite() && a >= 0.0 => a,
        _ => UNKNOWN_ACCURACY_M,
    }
}

/// Great-circle distance between two `(lat, lon)` pairs in meters.
pub fn distance_m(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = from;
    let (lat2, lon2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}
