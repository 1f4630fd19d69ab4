//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use gazer_core::error::CoreError;
use gazer_core::job::{validate_job_id, Job};
use gazer_core::types::{new_job_id, JobId};
use gazer_pipeline::ProgressRecord;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJob {
    /// Input image, base64-encoded. A `data:` URL prefix is accepted.
    pub image_base64: String,
    #[serde(default)]
    pub remove_background: bool,
    /// Opaque reference to whoever submitted the job.
    #[serde(default)]
    pub submitter_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub position: usize,
    pub was_queued: bool,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    /// 1-based queue position; `None` once the job has left the queue.
    pub position: Option<usize>,
    pub active: bool,
    pub progress: Option<ProgressRecord>,
    pub results_available: bool,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Stage the input image and admit the job. Returns 202 with the job id
/// and queue position, or 503 when the queue is full.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJob>,
) -> AppResult<impl IntoResponse> {
    let image = decode_image(&input.image_base64)?;

    let job_id = new_job_id();
    let input_path = state.storage.stage_input(&job_id, &image).await?;
    let job = Job::with_id(
        job_id.clone(),
        input.submitter_ref.unwrap_or_else(|| "anonymous".into()),
        input_path.to_string_lossy(),
        input.remove_background,
    );

    let admission = match state.queue.add(job) {
        Ok(admission) => admission,
        Err(e) => {
            if let Err(cleanup) = state.storage.remove_staging(&job_id).await {
                tracing::warn!(job_id = %job_id, error = %cleanup, "Failed to remove rejected input");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        job_id = %job_id,
        position = admission.position,
        bytes = image.len(),
        "Job submitted",
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmitResponse {
                job_id,
                position: admission.position,
                was_queued: admission.was_queued,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
///
/// Queue position and latest progress of a job. 404 when the job is
/// neither queued, tracked, nor stored.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    validate_job_id(&job_id)?;

    let position = state.queue.position(&job_id);
    let active = state.queue.active().is_some_and(|j| j.id == job_id);
    let progress = state.progress.store().get(&job_id).await;
    let results_available = !active && state.storage.exists(&job_id).await?;

    if position.is_none() && progress.is_none() && !results_available {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id,
        }));
    }

    Ok(Json(DataResponse {
        data: JobView {
            job_id,
            position,
            active,
            progress,
            results_available,
        },
    }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{id}
///
/// Cancel a queued job. The active job cannot be cancelled (409).
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<StatusCode> {
    validate_job_id(&job_id)?;

    if state.queue.remove(&job_id) {
        if let Err(e) = state.storage.remove_staging(&job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to remove cancelled input");
        }
        tracing::info!(job_id = %job_id, "Job cancelled");
        return Ok(StatusCode::NO_CONTENT);
    }

    if state.queue.active().is_some_and(|j| j.id == job_id) {
        return Err(AppError::Core(CoreError::Conflict(
            "The active job cannot be cancelled".into(),
        )));
    }

    Err(AppError::Core(CoreError::NotFound {
        entity: "Job",
        id: job_id,
    }))
}

// ---- private helpers ----

fn decode_image(raw: &str) -> AppResult<Vec<u8>> {
    let encoded = match raw.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => raw,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::BadRequest(format!("image_base64 is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("image_base64 is empty".into()));
    }
    Ok(bytes)
}
