use axum::routing::post;
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Job submission routes.
///
/// ```text
/// POST /run    run_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/run", post(jobs::run_job))
}
