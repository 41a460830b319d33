//! Acquisition cascade.
//!
//! The fallback order is data: an ordered list of [`CascadeStep`]s, each an
//! attempt plus the condition under which a failure falls through to the next
//! step. [`run`] is the only driver and stops at the first fix, at a failure
//! its step does not let through, or when the list is exhausted.
//!
//! Standard policy:
//!
//! | step | attempt | falls through on |
//! |---|---|---|
//! | `high-accuracy` | sensor, high accuracy, 15 s, no cached results | timeout / unavailable |
//! | `low-accuracy` | sensor, low accuracy, 60 s, results up to 5 min old | any failure |
//! | `ip-lookup` | IP geolocation, 5 km accuracy | (last) |

use chrono::Utc;
use metrics::counter;
use thiserror::Error;

use crate::config::LocatorConfig;
use crate::fix::{FixSource, PositionFix};
use crate::sources::{IpLocator, LocationSensor, SensorError, SensorRequest};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attempt {
    Sensor(SensorRequest),
    IpLookup,
}

/// Which failures let the cascade move on to the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallThrough {
    /// Anything except an explicit permission denial.
    OnTimeoutOrUnavailable,
    OnAnyFailure,
}

impl FallThrough {
    pub fn allows(self, failure: &StepFailure) -> bool {
        match self {
            Self::OnAnyFailure => true,
            Self::OnTimeoutOrUnavailable => !failure.is_permission_denied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepFailure {
    #[error("sensor: {0}")]
    Sensor(SensorError),
    #[error("no location sensor on this platform")]
    NoSensor,
    #[error("{0} returned non-finite coordinates")]
    InvalidFix(FixSource),
    #[error("IP lookup failed: {0}")]
    IpLookup(String),
}

impl StepFailure {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Sensor(SensorError::PermissionDenied))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeStep {
    pub name: &'static str,
    pub attempt: Attempt,
    pub fall_through: FallThrough,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPolicy {
    steps: Vec<CascadeStep>,
}

impl AcquisitionPolicy {
    pub fn new(steps: Vec<CascadeStep>) -> Self {
        Self { steps }
    }

    pub fn standard(config: &LocatorConfig) -> Self {
        Self::new(vec![
            CascadeStep {
                name: "high-accuracy",
                attempt: Attempt::Sensor(config.high_accuracy_request()),
                fall_through: FallThrough::OnTimeoutOrUnavailable,
            },
            CascadeStep {
                name: "low-accuracy",
                attempt: Attempt::Sensor(config.low_accuracy_request()),
                fall_through: FallThrough::OnAnyFailure,
            },
            CascadeStep {
                name: "ip-lookup",
                attempt: Attempt::IpLookup,
                fall_through: FallThrough::OnAnyFailure,
            },
        ])
    }

    pub fn steps(&self) -> &[CascadeStep] {
        &self.steps
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CascadeOutcome {
    Fix(PositionFix),
    /// Sensor access explicitly refused; no further source was tried.
    PermissionDenied,
    Exhausted {
        last_failure: Option<StepFailure>,
        saw_permission_denial: bool,
    },
}

async fn attempt(
    step: &CascadeStep,
    sensor: Option<&dyn LocationSensor>,
    ip_locator: &dyn IpLocator,
) -> Result<PositionFix, StepFailure> {
    let fix = match step.attempt {
        Attempt::Sensor(request) => {
            let sensor = sensor.ok_or(StepFailure::NoSensor)?;
            let reading = sensor
                .request_fix(request)
                .await
                .map_err(StepFailure::Sensor)?;
            reading.into_fix(request.fix_source())
        }
        Attempt::IpLookup => {
            let loc = ip_locator
                .lookup()
                .await
                .map_err(|e| StepFailure::IpLookup(format!("{e:#}")))?;
            PositionFix::from_ip_lookup(loc.latitude, loc.longitude, Utc::now().timestamp_millis())
        }
    };

    if fix.is_valid() {
        Ok(fix)
    } else {
        Err(StepFailure::InvalidFix(fix.source))
    }
}

/// Walk `policy` until a source yields a fix.
pub async fn run(
    policy: &AcquisitionPolicy,
    sensor: Option<&dyn LocationSensor>,
    ip_locator: &dyn IpLocator,
) -> CascadeOutcome {
    let mut last_failure = None;
    let mut saw_permission_denial = false;

    for step in policy.steps() {
        let failure = match attempt(step, sensor, ip_locator).await {
            Ok(fix) => {
                tracing::info!(
                    step = step.name,
                    source = %fix.source,
                    accuracy_m = fix.accuracy_meters,
                    "cascade produced a fix"
                );
                return CascadeOutcome::Fix(fix);
            }
            Err(failure) => failure,
        };

        counter!("locator_cascade_step_failures_total", "step" => step.name).increment(1);
        saw_permission_denial |= failure.is_permission_denied();

        if !step.fall_through.allows(&failure) {
            tracing::info!(step = step.name, "location permission denied, stopping cascade");
            return CascadeOutcome::PermissionDenied;
        }

        tracing::info!(step = step.name, error = %failure, "cascade step failed, falling back");
        last_failure = Some(failure);
    }

    CascadeOutcome::Exhausted {
        last_failure,
        saw_permission_denial,
    }
}
