//! Read-only views of the queue and the accelerator.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/queue
pub async fn get_queue(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: state.queue.snapshot(),
    }))
}

/// GET /api/v1/accelerator
pub async fn get_accelerator(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: state.accelerator.state(),
    }))
}
