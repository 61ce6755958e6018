//! Handler for job submission.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use genrelay_core::job::JobRequest;
use genrelay_pipeline::Acceptance;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /run
///
/// Validate the request and start the job in the background. Returns as
/// soon as the job is accepted; progress and results arrive through the
/// callback endpoint.
pub async fn run_job(
    State(state): State<AppState>,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> AppResult<Json<Acceptance>> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let acceptance = state.orchestrator.accept(request)?;
    Ok(Json(acceptance))
}
