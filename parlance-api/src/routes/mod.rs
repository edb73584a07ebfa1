//! HTTP routes.

mod call;
mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;
use crate::telemetry::metrics_handler;

pub use call::{CallView, CreateCallRequest, CreateCallResponse};

/// Build the API router.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/call", post(call::create_call).get(call::list_calls))
        .route("/health/liveness", get(health::liveness))
        .route("/health/readiness", get(health::readiness))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
