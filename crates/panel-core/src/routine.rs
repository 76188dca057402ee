//! Maintenance routines: preview what a routine would do, hand the caller a
//! one-time confirm token bound to that exact preview, and apply only when
//! the token comes back unchanged.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::audit::extract_json_from_stdout;
use crate::confirm::{preview_hash, ConfirmTokenStore};
use crate::error::{PanelError, Result};
use crate::exec::CommandRunner;
use crate::job::{JobStatus, JobStore};
use crate::logfile::ActionLog;
use crate::repos::Repo;
use crate::result::{ActionResult, ErrorKind};

pub const DEFAULT_ROUTINE_BIN: &str = "wgx";
const ROUTINE_TIMEOUT: Duration = Duration::from_secs(120);

static ROUTINE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid regex"));

/// Routine ids are passed straight into an argv slot; anything outside the
/// allow-listed character set is rejected up front.
pub fn is_valid_routine_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 128 && ROUTINE_ID.is_match(id)
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutinePreview {
    pub routine_id: String,
    pub preview: Value,
    pub confirm_token: String,
    pub preview_hash: String,
}

/// Run the routine in preview mode and issue a confirm token bound to the
/// repo, routine and the preview payload hash.
pub fn routine_preview(
    runner: &dyn CommandRunner,
    tokens: &ConfirmTokenStore,
    repo: &Repo,
    bin: &str,
    routine_id: &str,
) -> Result<RoutinePreview> {
    if !is_valid_routine_id(routine_id) {
        return Err(PanelError::InvalidRoutine(routine_id.to_string()));
    }

    let out = runner
        .run(
            &[bin, "routine", routine_id, "preview"],
            &repo.path,
            ROUTINE_TIMEOUT,
            None,
        )
        .map_err(|err| PanelError::ToolOutput(err.to_string()))?;

    let preview = extract_json_from_stdout(&out.stdout).ok_or_else(|| {
        PanelError::ToolOutput(format!(
            "routine preview produced no JSON (exit code {})",
            out.code
        ))
    })?;

    let hash = preview_hash(&preview);
    let token = tokens.issue(&repo.key, routine_id, &hash);
    Ok(RoutinePreview {
        routine_id: routine_id.to_string(),
        preview,
        confirm_token: token,
        preview_hash: hash,
    })
}

pub struct RoutineContext<'a> {
    pub jobs: &'a JobStore,
    pub runner: &'a dyn CommandRunner,
    pub log: &'a ActionLog,
    pub repo: &'a Repo,
    pub job_id: &'a str,
    pub correlation_id: &'a str,
    pub bin: &'a str,
}

/// Apply a routine as a job.
///
/// The routine's own JSON verdict is authoritative: an exit code other than
/// zero is tolerated as long as the payload carries an `ok` field. A payload
/// with `ok=false` records a successful step whose finding is bad, so the
/// action stays `ok=true` and only the job flips to error. An unparseable
/// payload with a non-zero exit is a process failure.
pub fn run_routine_apply_job(ctx: &RoutineContext<'_>, routine_id: &str) {
    ctx.jobs.set_status(ctx.job_id, JobStatus::Running);

    let action = format!("routine.{routine_id}.apply");
    let base = ActionResult::new(&action, ctx.correlation_id).with_repo(&ctx.repo.key);

    let out = match ctx.runner.run(
        &[ctx.bin, "routine", routine_id, "apply"],
        &ctx.repo.path,
        ROUTINE_TIMEOUT,
        None,
    ) {
        Ok(out) => out,
        Err(err) => {
            let result = base.failed(ErrorKind::ProcessError, err.to_string());
            ctx.log.append(&result);
            ctx.jobs.record(ctx.job_id, result);
            ctx.jobs.set_status(ctx.job_id, JobStatus::Error);
            return;
        }
    };

    let payload = extract_json_from_stdout(&out.stdout);
    let verdict = payload.as_ref().and_then(|p| p.get("ok")).and_then(Value::as_bool);

    let (result, job_status) = match (verdict, out.code) {
        (Some(true), _) => (
            base.with_output(&out)
                .with_message(format!("Routine '{routine_id}' applied"))
                .with_audit(payload.unwrap_or(Value::Null)),
            JobStatus::Done,
        ),
        (Some(false), _) => (
            base.with_output(&out)
                .with_message(format!("Routine '{routine_id}' reported a failed apply"))
                .with_audit(payload.unwrap_or(Value::Null)),
            JobStatus::Error,
        ),
        (None, 0) => (
            base.with_output(&out)
                .with_message(format!("Routine '{routine_id}' applied (no verdict payload)")),
            JobStatus::Done,
        ),
        (None, code) => (
            base.with_output(&out).failed(
                ErrorKind::ProcessError,
                format!("routine apply exited with code {code} and no verdict payload"),
            ),
            JobStatus::Error,
        ),
    };

    ctx.log.append(&result);
    ctx.jobs.record(ctx.job_id, result);
    ctx.jobs.set_status(ctx.job_id, job_status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRunner;

    fn repo() -> Repo {
        Repo {
            key: "metarepo".into(),
            path: "/tmp/mock".into(),
            display: String::new(),
        }
    }

    #[test]
    fn routine_id_validation() {
        assert!(is_valid_routine_id("git.gc"));
        assert!(is_valid_routine_id("prune-remotes_v2"));
        assert!(!is_valid_routine_id(""));
        assert!(!is_valid_routine_id("rm -rf"));
        assert!(!is_valid_routine_id("a;b"));
        assert!(!is_valid_routine_id("../escape"));
        assert!(!is_valid_routine_id(&"x".repeat(129)));
    }

    #[test]
    fn preview_issues_token_bound_to_payload() {
        let runner = MockRunner::new().on(
            &["wgx", "routine", "git.gc", "preview"],
            0,
            r#"progress...
{"ok": true, "would_remove": ["refs/remotes/origin/stale"]}"#,
            "",
        );
        let tokens = ConfirmTokenStore::default();
        let repo = repo();

        let p = routine_preview(&runner, &tokens, &repo, "wgx", "git.gc").unwrap();
        assert_eq!(p.routine_id, "git.gc");
        assert_eq!(p.preview["would_remove"][0], "refs/remotes/origin/stale");
        assert_eq!(p.preview_hash, preview_hash(&p.preview));
        assert!(tokens.consume(&p.confirm_token, "metarepo", "git.gc", &p.preview_hash));
    }

    #[test]
    fn preview_rejects_invalid_id_before_running_anything() {
        let runner = MockRunner::new();
        let tokens = ConfirmTokenStore::default();
        let err = routine_preview(&runner, &tokens, &repo(), "wgx", "bad id").unwrap_err();
        assert!(matches!(err, PanelError::InvalidRoutine(_)));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn preview_without_json_is_an_error() {
        let runner = MockRunner::new().on(&["wgx"], 0, "nothing structured", "");
        let tokens = ConfirmTokenStore::default();
        let err = routine_preview(&runner, &tokens, &repo(), "wgx", "git.gc").unwrap_err();
        assert!(err.to_string().contains("no JSON"));
    }

    fn apply_harness() -> (JobStore, String, String) {
        let jobs = JobStore::new();
        let (job_id, correlation_id) = jobs.create();
        (jobs, job_id, correlation_id)
    }

    fn run_apply(runner: &MockRunner, routine_id: &str) -> crate::job::Job {
        let (jobs, job_id, correlation_id) = apply_harness();
        let repo = repo();
        let ctx = RoutineContext {
            jobs: &jobs,
            runner,
            log: &ActionLog::disabled(),
            repo: &repo,
            job_id: &job_id,
            correlation_id: &correlation_id,
            bin: "wgx",
        };
        run_routine_apply_job(&ctx, routine_id);
        jobs.get(&job_id).unwrap()
    }

    #[test]
    fn apply_with_ok_true_completes() {
        let runner = MockRunner::new().on(
            &["wgx", "routine", "git.gc", "apply"],
            0,
            r#"{"ok": true, "removed": 3}"#,
            "",
        );
        let job = run_apply(&runner, "git.gc");
        assert_eq!(job.status, JobStatus::Done);
        let r = &job.results[0];
        assert!(r.ok);
        assert_eq!(r.action, "routine.git.gc.apply");
        assert_eq!(r.audit.as_ref().unwrap()["removed"], 3);
    }

    #[test]
    fn nonzero_exit_with_verdict_is_tolerated() {
        let runner = MockRunner::new().on(
            &["wgx", "routine", "git.gc", "apply"],
            2,
            r#"{"ok": true, "note": "partial"}"#,
            "",
        );
        let job = run_apply(&runner, "git.gc");
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.results[0].ok);
    }

    #[test]
    fn ok_false_verdict_keeps_action_ok_but_fails_the_job() {
        let runner = MockRunner::new().on(
            &["wgx", "routine", "git.gc", "apply"],
            0,
            r#"{"ok": false, "reason": "locked"}"#,
            "",
        );
        let job = run_apply(&runner, "git.gc");
        assert_eq!(job.status, JobStatus::Error);
        let r = &job.results[0];
        assert!(r.ok);
        assert_eq!(r.error_kind, None);
        assert_eq!(r.audit.as_ref().unwrap()["reason"], "locked");
    }

    #[test]
    fn nonzero_exit_without_verdict_is_a_process_error() {
        let runner = MockRunner::new().on(
            &["wgx", "routine", "git.gc", "apply"],
            1,
            "stack trace goes here",
            "boom",
        );
        let job = run_apply(&runner, "git.gc");
        assert_eq!(job.status, JobStatus::Error);
        let r = &job.results[0];
        assert!(!r.ok);
        assert_eq!(r.error_kind, Some(ErrorKind::ProcessError));
    }

    #[test]
    fn zero_exit_without_verdict_completes() {
        let runner = MockRunner::new().on(
            &["wgx", "routine", "git.gc", "apply"],
            0,
            "done",
            "",
        );
        let job = run_apply(&runner, "git.gc");
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.results[0].ok);
    }
}
