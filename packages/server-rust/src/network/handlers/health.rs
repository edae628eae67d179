//! Health, liveness, and readiness probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::db::Database;
use crate::network::HealthState;

/// Always 200; the body says whether the server is actually ready.
pub async fn health_handler<D: Database>(State(state): State<AppState<D>>) -> Json<serde_json::Value> {
    let rate_limited_clients: usize = state.limiters.iter().map(|s| s.tracked_clients()).sum();

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "in_flight": state.shutdown.in_flight_count(),
        "rate_limited_clients": rate_limited_clients,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// 503 outside `Ready`, so the instance is taken out of rotation while
/// starting and draining.
pub async fn readiness_handler<D: Database>(State(state): State<AppState<D>>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
