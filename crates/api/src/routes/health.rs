use axum::extract::State;
use axum::{routing::get, Json, Router};
use gazer_accelerator::AcceleratorStage;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub accelerator: AcceleratorStage,
    pub processing: bool,
    pub queue_length: usize,
}

/// GET /health -- service liveness plus a queue/accelerator summary.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        accelerator: state.accelerator.state().stage,
        processing: state.queue.is_processing(),
        queue_length: state.queue.queue_len(),
    })
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
