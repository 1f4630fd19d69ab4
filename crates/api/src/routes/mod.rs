pub mod health;
pub mod jobs;
pub mod results;
pub mod status;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                       submit (POST)
/// /jobs/{id}                  position + progress (GET), cancel (DELETE)
///
/// /queue                      queue snapshot
/// /accelerator                accelerator state
///
/// /results                    list stored jobs
/// /results/{id}               delete stored artifacts (DELETE)
/// /results/{id}/{name}        download one artifact
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/results", results::router())
        .merge(status::router())
}
