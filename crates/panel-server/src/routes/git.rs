use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;

use crate::error::AppError;
use crate::routes::RepoQuery;
use crate::state::AppState;
use panel_core::job::new_correlation_id;
use panel_core::patch::ApplyOptions;
use panel_core::publish::{execute_publish, PublishContext, PublishOptions};
use panel_core::result::ActionResult;

const STATUS_TIMEOUT: Duration = Duration::from_secs(30);
const DIFF_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(serde::Deserialize)]
pub struct PublishBody {
    pub repo: String,
    #[serde(flatten)]
    pub options: PublishOptions,
}

/// POST /api/git/publish — run the guarded publish flow as a background job.
///
/// The repo key is validated before the job exists, so an unknown key is a
/// plain 400 with no job id.
pub async fn publish(
    State(app): State<AppState>,
    Json(body): Json<PublishBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo = app.repos.get(&body.repo)?.clone();
    let (job_id, correlation_id) = app.jobs.create();

    let state = app.clone();
    let job = job_id.clone();
    let cid = correlation_id.clone();
    let options = body.options;
    tokio::task::spawn_blocking(move || {
        let ctx = PublishContext {
            jobs: &state.jobs,
            runner: &*state.runner,
            log: &state.action_log,
            repo: &repo,
            job_id: &job,
            correlation_id: &cid,
            rewrite_https_remote: state.settings.rewrite_https_remote,
        };
        execute_publish(&ctx, &options);
    });

    Ok(Json(serde_json::json!({
        "job_id": job_id,
        "correlation_id": correlation_id,
    })))
}

#[derive(serde::Deserialize)]
pub struct ApplyPatchBody {
    pub repo: String,
    #[serde(flatten)]
    pub options: ApplyOptions,
}

/// POST /api/patch/apply — apply a session patch to the working tree.
///
/// Runs synchronously: `git apply --check` then the real apply, guarded on
/// the checked-out branch. A patch that does not apply is a 409.
pub async fn apply_patch(
    State(app): State<AppState>,
    Json(body): Json<ApplyPatchBody>,
) -> Result<Json<ActionResult>, AppError> {
    let repo = app.repos.get(&body.repo)?.clone();
    let runner = app.runner.clone();
    let cid = new_correlation_id();
    let options = body.options;
    let result = tokio::task::spawn_blocking(move || {
        panel_core::patch::apply_patch(&*runner, &repo, &options, &cid)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    app.action_log.append(&result);
    Ok(Json(result))
}

/// GET /api/git/status — raw `git status` for the repo, as text.
pub async fn status(
    State(app): State<AppState>,
    Query(q): Query<RepoQuery>,
) -> Result<String, AppError> {
    let repo = app.repos.get(&q.repo)?.clone();
    let runner = app.runner.clone();
    let out = tokio::task::spawn_blocking(move || {
        runner.run(&["git", "status"], &repo.path, STATUS_TIMEOUT, None)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(out.combined())
}

/// GET /api/git/diff — working-tree diff for the repo, as text.
pub async fn diff(
    State(app): State<AppState>,
    Query(q): Query<RepoQuery>,
) -> Result<String, AppError> {
    let repo = app.repos.get(&q.repo)?.clone();
    let runner = app.runner.clone();
    let out = tokio::task::spawn_blocking(move || {
        runner.run(&["git", "diff"], &repo.path, DIFF_TIMEOUT, None)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(out.combined())
}
