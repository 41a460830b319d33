// src/lib.rs
// Public library surface for the service binary, demos and integration tests.

pub mod fix;
pub mod reconciler;
pub mod cache;
pub mod sources;
pub mod cascade;
pub mod status;
pub mod arbitrator;
pub mod live;
pub mod nearby;

pub mod config;
pub mod metrics;
pub mod api;
pub mod bootstrap;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::arbitrator::{LocationArbitrator, TrackingGuard};
pub use crate::fix::{FixSource, PositionFix};
pub use crate::reconciler::{FixReconciler, Verdict};
pub use crate::status::AcquisitionStatus;

/// Load [`config::LocatorConfig`] the default way and build the full router.
///
/// ```ignore
/// let router = safety_locator::app().await?;
/// ```
pub async fn app() -> anyhow::Result<axum::Router> {
    let cfg = config::LocatorConfig::load_default()?;
    bootstrap::build_app(cfg).await
}
