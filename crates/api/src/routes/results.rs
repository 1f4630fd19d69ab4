//! Route definitions for the `/results` resource.

use axum::routing::{delete, get};
use axum::Router;

use crate::handlers::results;
use crate::state::AppState;

/// Routes mounted at `/results`.
///
/// ```text
/// GET    /              -> list_results
/// DELETE /{id}          -> delete_result
/// GET    /{id}/{name}   -> get_artifact
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(results::list_results))
        .route("/{id}", delete(results::delete_result))
        .route("/{id}/{name}", get(results::get_artifact))
}
