//! Safety Locator - Binary Entrypoint
//! Boots the Axum HTTP server with the location arbitrator wired in.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - LOCATOR_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("LOCATOR_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("safety_locator=debug,warn"));

    // Shuttle may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let router = safety_locator::app().await?;
    Ok(router.into())
}
