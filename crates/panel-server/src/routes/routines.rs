use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::auth::require_actor_token;
use crate::error::AppError;
use crate::state::AppState;
use panel_core::routine::{routine_preview, run_routine_apply_job, RoutineContext, RoutinePreview};
use panel_core::PanelError;

#[derive(serde::Deserialize)]
pub struct PreviewBody {
    pub repo: String,
    pub routine_id: String,
}

#[derive(serde::Deserialize)]
pub struct ApplyBody {
    pub repo: String,
    pub routine_id: String,
    pub confirm_token: String,
    pub preview_hash: String,
}

fn gate(app: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    if !app.settings.routines_enabled {
        return Err(PanelError::RoutinesDisabled.into());
    }
    require_actor_token(headers, &app.settings)?;
    Ok(())
}

/// POST /api/routine/preview — dry-run a routine and issue a confirm token.
pub async fn preview(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PreviewBody>,
) -> Result<Json<RoutinePreview>, AppError> {
    gate(&app, &headers)?;
    let repo = app.repos.get(&body.repo)?.clone();

    let runner = app.runner.clone();
    let tokens = app.tokens.clone();
    let bin = app.settings.routine_bin.clone();
    let result = tokio::task::spawn_blocking(move || {
        routine_preview(&*runner, &tokens, &repo, &bin, &body.routine_id)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// POST /api/routine/apply — consume the confirm token and run the routine
/// as a background job.
pub async fn apply(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ApplyBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    gate(&app, &headers)?;
    let repo = app.repos.get(&body.repo)?.clone();

    if !app.tokens.consume(
        &body.confirm_token,
        &repo.key,
        &body.routine_id,
        &body.preview_hash,
    ) {
        return Err(PanelError::InvalidToken.into());
    }

    let (job_id, correlation_id) = app.jobs.create();
    let state = app.clone();
    let job = job_id.clone();
    let cid = correlation_id.clone();
    tokio::task::spawn_blocking(move || {
        let ctx = RoutineContext {
            jobs: &state.jobs,
            runner: &*state.runner,
            log: &state.action_log,
            repo: &repo,
            job_id: &job,
            correlation_id: &cid,
            bin: &state.settings.routine_bin,
        };
        run_routine_apply_job(&ctx, &body.routine_id);
    });

    Ok(Json(serde_json::json!({
        "job_id": job_id,
        "correlation_id": correlation_id,
    })))
}
