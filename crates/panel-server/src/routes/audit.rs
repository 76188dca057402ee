use axum::extract::{Query, State};
use axum::Json;

use crate::error::AppError;
use crate::routes::RepoQuery;
use crate::state::AppState;
use panel_core::audit::{read_latest_report, run_audit, run_audit_job, AuditContext};

#[derive(serde::Deserialize)]
pub struct AuditBody {
    pub repo: String,
}

/// GET /api/audit/git/sync — run the audit and wait for the report.
pub async fn sync(
    State(app): State<AppState>,
    Query(q): Query<RepoQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo = app.repos.get(&q.repo)?.clone();
    let runner = app.runner.clone();
    let audit_bin = app.settings.audit_bin.clone();
    let (report, source) = tokio::task::spawn_blocking(move || {
        let correlation_id = panel_core::job::new_correlation_id();
        run_audit(&*runner, &repo.path, &audit_bin, &correlation_id)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(serde_json::json!({
        "source": source,
        "report": report,
    })))
}

/// GET /api/audit/git/latest — newest persisted artifact, without running
/// the tool.
pub async fn latest(
    State(app): State<AppState>,
    Query(q): Query<RepoQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo = app.repos.get(&q.repo)?.clone();
    let report = tokio::task::spawn_blocking(move || read_latest_report(&repo.path))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(report))
}

/// POST /api/audit/git — audit as a background job.
pub async fn start_job(
    State(app): State<AppState>,
    Json(body): Json<AuditBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo = app.repos.get(&body.repo)?.clone();
    let (job_id, correlation_id) = app.jobs.create();

    let state = app.clone();
    let job = job_id.clone();
    let cid = correlation_id.clone();
    tokio::task::spawn_blocking(move || {
        let ctx = AuditContext {
            jobs: &state.jobs,
            runner: &*state.runner,
            log: &state.action_log,
            repo: &repo,
            job_id: &job,
            correlation_id: &cid,
            audit_bin: &state.settings.audit_bin,
        };
        run_audit_job(&ctx);
    });

    Ok(Json(serde_json::json!({
        "job_id": job_id,
        "correlation_id": correlation_id,
    })))
}
