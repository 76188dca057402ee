use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::routes::RepoQuery;
use crate::state::AppState;
use jules_agent::DiffOutput;
use panel_core::job::new_correlation_id;
use panel_core::result::ActionResult;

#[derive(serde::Deserialize)]
pub struct NewSessionBody {
    pub repo: String,
    pub title: String,
}

/// GET /api/sessions?repo= — raw session listing from the agent CLI.
pub async fn list(
    State(app): State<AppState>,
    Query(q): Query<RepoQuery>,
) -> Result<String, AppError> {
    let repo = app.repos.get(&q.repo)?.clone();
    let runner = app.runner.clone();
    let agent = app.agent.clone();
    let listing = tokio::task::spawn_blocking(move || agent.list_sessions(&*runner, &repo.path))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(listing)
}

/// POST /api/sessions/new — start a fresh agent session with a task title.
///
/// Session creation is a mutating action, so it leaves a record in the
/// action log like every other one.
pub async fn create(
    State(app): State<AppState>,
    axum::Json(body): axum::Json<NewSessionBody>,
) -> Result<String, AppError> {
    let repo = app.repos.get(&body.repo)?.clone();
    let runner = app.runner.clone();
    let agent = app.agent.clone();
    let title = body.title.clone();
    let path = repo.path.clone();
    let out = tokio::task::spawn_blocking(move || agent.new_session(&*runner, &path, &title))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    let record = ActionResult::new("session.new", &new_correlation_id())
        .with_repo(&repo.key)
        .with_message(format!("Created session for '{}'", body.title));
    app.action_log.append(&record);

    Ok(out)
}

/// GET /api/sessions/:session_id/diff?repo= — the session's patch.
///
/// An empty pull is a 404; output the normalizer cannot classify as a patch
/// is a 502, not something to hand to `git apply`.
pub async fn diff(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
    Query(q): Query<RepoQuery>,
) -> Result<String, AppError> {
    let repo = app.repos.get(&q.repo)?.clone();
    let runner = app.runner.clone();
    let agent = app.agent.clone();
    let output =
        tokio::task::spawn_blocking(move || agent.pull_diff(&*runner, &repo.path, &session_id))
            .await
            .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    match output {
        DiffOutput::Patch(patch) => Ok(patch),
        DiffOutput::Empty => Err(AppError::not_found("No patch returned for this session.")),
        DiffOutput::Unrecognized(_) => Err(AppError::bad_gateway("unrecognized_output")),
    }
}

/// GET /api/sessions/:session_id/diff/download — the same patch, served as
/// a file attachment.
pub async fn diff_download(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
    Query(q): Query<RepoQuery>,
) -> Result<Response, AppError> {
    let filename = format!("jules-session-{session_id}.diff");
    let patch = diff(State(app), Path(session_id), Query(q)).await?;
    Ok((
        [(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )],
        patch,
    )
        .into_response())
}
