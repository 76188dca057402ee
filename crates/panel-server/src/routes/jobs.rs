use axum::extract::{Path, State};
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;
use panel_core::job::Job;
use panel_core::PanelError;

/// GET /api/jobs/:job_id — full job snapshot.
///
/// Terminal jobs are immutable, so repeated polls return byte-identical
/// bodies.
pub async fn get_job(
    State(app): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, AppError> {
    let job = app
        .jobs
        .get(&job_id)
        .ok_or(PanelError::JobNotFound(job_id))?;
    Ok(Json(job))
}
