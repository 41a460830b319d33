//! Fix Reconciler - decides whether a candidate fix replaces the accepted one.
//!
//! Rules, in order:
//! 1. Non-finite coordinates are dropped.
//! 2. The first valid fix always wins.
//! 3. A fix coarser than 20 km never overrides an existing fix.
//! 4. A trusted fix (< 50 m) is not evicted by a noisy one (> 1000 m).
//! 5. Otherwise accept on movement (> 0.00005° on either axis) or on a
//!    strictly better accuracy.
//! 6. Anything else is jitter and leaves the accepted fix untouched.
//!
//! The rules only compare the candidate against the accepted fix, so late or
//! out-of-order deliveries are harmless: a worse reading simply loses.

use crate::fix::PositionFix;

/// Fixes coarser than this never override an existing fix.
pub const COARSE_LIMIT_M: f64 = 20_000.0;
/// An accepted fix below this accuracy is considered trusted.
pub const TRUSTED_ACCURACY_M: f64 = 50.0;
/// A candidate above this accuracy may not evict a trusted fix.
pub const NOISY_ACCURACY_M: f64 = 1_000.0;
/// Minimum per-axis displacement counted as movement (~5.5 m).
pub const MOVEMENT_DELTA_DEG: f64 = 0.00005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    FirstFix,
    Moved,
    MorePrecise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidCoordinates,
    TooCoarse,
    PrecisionDowngrade,
    Jitter,
}

impl AcceptReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstFix => "first-fix",
            Self::Moved => "moved",
            Self::MorePrecise => "more-precise",
        }
    }
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCoordinates => "invalid-coordinates",
            Self::TooCoarse => "too-coarse",
            Self::PrecisionDowngrade => "precision-downgrade",
            Self::Jitter => "jitter",
        }
    }
}

/// Outcome of reconciling one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted(AcceptReason),
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted(r) => write!(f, "accepted:{}", r.as_str()),
            Self::Rejected(r) => write!(f, "rejected:{}", r.as_str()),
        }
    }
}

/// Holds the accepted fix and applies the rules above.
///
/// Once a fix has been accepted the state never goes back to "no fix".
#[derive(Debug, Default)]
pub struct FixReconciler {
    accepted: Option<PositionFix>,
}

impl FixReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently accepted fix, if any.
    pub fn accepted(&self) -> Option<PositionFix> {
        self.accepted
    }

    /// Judge `candidate` without mutating anything.
    pub fn evaluate(&self, candidate: &PositionFix) -> Verdict {
        if !candidate.is_valid() {
            return Verdict::Rejected(RejectReason::InvalidCoordinates);
        }

        let Some(current) = &self.accepted else {
            return Verdict::Accepted(AcceptReason::FirstFix);
        };

        if candidate.accuracy_meters > COARSE_LIMIT_M {
            return Verdict::Rejected(RejectReason::TooCoarse);
        }

        if current.accuracy_meters < TRUSTED_ACCURACY_M
            && candidate.accuracy_meters > NOISY_ACCURACY_M
        {
            return Verdict::Rejected(RejectReason::PrecisionDowngrade);
        }

        if candidate.moved_from(current, MOVEMENT_DELTA_DEG) {
            return Verdict::Accepted(AcceptReason::Moved);
        }

        if candidate.accuracy_meters < current.accuracy_meters {
            return Verdict::Accepted(AcceptReason::MorePrecise);
        }

        Verdict::Rejected(RejectReason::Jitter)
    }

    /// Judge `candidate` and, if accepted, make it the accepted fix.
    pub fn apply(&mut self, candidate: PositionFix) -> Verdict {
        let verdict = self.evaluate(&candidate);
        if verdict.is_accepted() {
            self.accepted = Some(candidate);
        }
        verdict
    }
}
