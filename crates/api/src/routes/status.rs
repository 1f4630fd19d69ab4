use axum::routing::get;
use axum::Router;

use crate::handlers::status;
use crate::state::AppState;

/// ```text
/// GET /queue        -> get_queue
/// GET /accelerator  -> get_accelerator
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue", get(status::get_queue))
        .route("/accelerator", get(status::get_accelerator))
}
