//! Handlers for stored job results.

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use gazer_core::error::CoreError;
use gazer_storage::names::content_type_for;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/results
///
/// Every stored job, newest first, merged across backends.
pub async fn list_results(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let listings = state.storage.list().await?;
    Ok(Json(DataResponse { data: listings }))
}

/// GET /api/v1/results/{id}/{name}
pub async fn get_artifact(
    State(state): State<AppState>,
    Path((job_id, name)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let bytes = state.storage.read(&job_id, &name).await?;
    Ok(([(CONTENT_TYPE, content_type_for(&name))], bytes))
}

/// DELETE /api/v1/results/{id}
pub async fn delete_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<StatusCode> {
    if state.queue.active().is_some_and(|j| j.id == job_id) {
        return Err(AppError::Core(CoreError::Conflict(
            "Results of the active job cannot be deleted".into(),
        )));
    }

    if state.storage.delete(&job_id).await? {
        tracing::info!(job_id = %job_id, "Results deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Core(CoreError::NotFound {
            entity: "Result",
            id: job_id,
        }))
    }
}
