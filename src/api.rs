use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::arbitrator::{LocationArbitrator, TrackingGuard};
use crate::fix::PositionFix;
use crate::nearby::{self, NearbyNode, SafetyNode, NEARBY_RADIUS_DEG};
use crate::sources::device::DeviceFeedSensor;
use crate::sources::{SensorError, SensorReading};

#[derive(Clone)]
pub struct AppState {
    pub locator: Arc<LocationArbitrator>,
    /// Present when positions are pushed by a client device.
    pub device: Option<Arc<DeviceFeedSensor>>,
    pub nodes: Arc<Vec<SafetyNode>>,
    /// Held so tracking lives as long as the router.
    pub tracking: Option<Arc<TrackingGuard>>,
}

impl AppState {
    pub fn new(locator: Arc<LocationArbitrator>) -> Self {
        Self {
            locator,
            device: None,
            nodes: Arc::new(Vec::new()),
            tracking: None,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/position", get(position))
        .route("/api/status", get(status))
        .route("/api/refresh", post(refresh))
        .route("/api/sensor/reading", post(push_reading))
        .route("/api/sensor/error", post(push_error))
        .route("/api/nearby", get(nearby_nodes))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn position(State(state): State<AppState>) -> Json<Option<PositionFix>> {
    Json(state.locator.current())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOut {
    state: &'static str,
    message: Option<String>,
    has_position: bool,
}

async fn status(State(state): State<AppState>) -> Json<StatusOut> {
    let status = state.locator.status();
    Json(StatusOut {
        state: status.as_str(),
        message: status.message().map(str::to_string),
        has_position: state.locator.current().is_some(),
    })
}

#[derive(Serialize)]
struct RefreshOut {
    accepted: bool,
    verdict: String,
}

#[derive(Serialize)]
struct ErrorOut {
    error: SensorError,
    message: String,
}

fn sensor_error(e: SensorError) -> (StatusCode, Json<ErrorOut>) {
    let code = match e {
        SensorError::PermissionDenied => StatusCode::FORBIDDEN,
        SensorError::Unavailable | SensorError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(ErrorOut {
            error: e,
            message: e.to_string(),
        }),
    )
}

async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    match state.locator.refresh().await {
        Ok(verdict) => Json(RefreshOut {
            accepted: verdict.is_accepted(),
            verdict: verdict.to_string(),
        })
        .into_response(),
        Err(e) => sensor_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct ReadingIn {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: Option<f64>,
    /// Unix epoch millis; receive time when omitted.
    #[serde(default)]
    timestamp: Option<i64>,
}

async fn push_reading(
    State(state): State<AppState>,
    Json(body): Json<ReadingIn>,
) -> StatusCode {
    let Some(device) = &state.device else {
        return StatusCode::NOT_FOUND;
    };
    device.push_reading(SensorReading {
        latitude: body.latitude,
        longitude: body.longitude,
        accuracy_meters: body.accuracy,
        timestamp_millis: body
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis()),
    });
    StatusCode::ACCEPTED
}

#[derive(Deserialize)]
struct ErrorIn {
    code: SensorError,
}

async fn push_error(State(state): State<AppState>, Json(body): Json<ErrorIn>) -> StatusCode {
    let Some(device) = &state.device else {
        return StatusCode::NOT_FOUND;
    };
    device.push_error(body.code);
    StatusCode::ACCEPTED
}

async fn nearby_nodes(State(state): State<AppState>) -> Json<Vec<NearbyNode>> {
    match state.locator.current() {
        Some(fix) => Json(nearby::nearby(&state.nodes, &fix, NEARBY_RADIUS_DEG)),
        None => Json(Vec::new()),
    }
}
