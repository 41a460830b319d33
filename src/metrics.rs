use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process and describe the
    /// locator metrics. Later calls reuse the same handle.
    pub fn init() -> Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                let handle = PrometheusBuilder::new()
                    .install_recorder()
                    .context("prometheus: install recorder")?;
                describe();
                Ok::<_, anyhow::Error>(handle)
            })?
            .clone();

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!(
        "locator_fixes_accepted_total",
        "Fixes accepted by the reconciler, by source"
    );
    describe_counter!(
        "locator_fixes_rejected_total",
        "Fixes rejected by the reconciler, by reason"
    );
    describe_counter!(
        "locator_cascade_step_failures_total",
        "Failed cascade steps, by step"
    );
    describe_counter!(
        "locator_cache_write_failures_total",
        "Position cache writes that failed"
    );
    describe_counter!(
        "locator_live_publish_failures_total",
        "Live coordinate publishes that failed"
    );
    describe_gauge!(
        "locator_last_fix_accuracy_m",
        "Accuracy radius of the last accepted fix, meters"
    );
}
