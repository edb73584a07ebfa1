//! Liveness and readiness probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use parlance_core::{EntityIdType, CallId};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthBody {
    status: &'static str,
    uptime_sec: u64,
}

/// Process is up.
pub async fn liveness(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        uptime_sec: state.start_time.elapsed().as_secs(),
    })
}

/// Dependencies answer; a failing store read flips the probe.
pub async fn readiness(
    State(state): State<AppState>,
) -> Result<Json<HealthBody>, StatusCode> {
    match state.store.get_by_id(CallId::nil()).await {
        Ok(_) => Ok(Json(HealthBody {
            status: "ready",
            uptime_sec: state.start_time.elapsed().as_secs(),
        })),
        Err(e) => {
            tracing::error!(error = %e, "readiness probe failed on store");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
