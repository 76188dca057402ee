//! Repository audit: drive the audit tool, recover its JSON report from
//! noisy stdout or from on-disk artifacts, and fold the verdict into a job.
//!
//! A report that *says* `status: error` is a successful audit run whose
//! findings are bad; the action stays `ok=true` and only the job flips to
//! error. A run that produces no readable report at all is a technical
//! failure and the action itself carries `error_kind`.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PanelError, Result};
use crate::exec::CommandRunner;
use crate::job::{JobStatus, JobStore};
use crate::logfile::ActionLog;
use crate::repos::Repo;
use crate::result::{ActionResult, ErrorKind};

pub const DEFAULT_AUDIT_BIN: &str = "wgx";
const AUDIT_TIMEOUT: Duration = Duration::from_secs(120);
const ARTIFACT_DIR: &str = ".wgx/out";
const ARTIFACT_PREFIX: &str = "audit.git.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCheck {
    pub id: String,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Parsed audit report. Unknown top-level keys are preserved so the raw
/// report survives a round trip back to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub status: AuditStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub checks: Vec<AuditCheck>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Where a report was recovered from, reported back to the caller so the
/// UI can show whether it is live output or a stale artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    Stdout,
    Artifact,
}

// ---------------------------------------------------------------------------
// Report recovery
// ---------------------------------------------------------------------------

/// Extract the first balanced JSON object from `text`.
///
/// Audit tools interleave progress lines with the report, so a plain
/// `from_str` on the whole stream fails; this scans for the first `{` and
/// tracks brace depth, honoring string literals and escapes.
pub fn extract_json_from_stdout(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&text[start..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Resolve a caller-supplied artifact path relative to the repo root.
/// Absolute paths and any `..` component are rejected.
pub fn resolve_artifact_path(repo_path: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(PanelError::AuditArtifactNotFound(rel.to_string()));
    }
    for component in rel_path.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(PanelError::AuditArtifactNotFound(rel.to_string())),
        }
    }
    let resolved = repo_path.join(rel_path);
    if !resolved.is_file() {
        return Err(PanelError::AuditArtifactNotFound(rel.to_string()));
    }
    Ok(resolved)
}

fn read_report(path: &Path) -> Option<Value> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Some audit invocations print the artifact path instead of the report.
/// Pick the first whitespace-separated `.json` token that resolves to a real
/// file inside the repo.
pub fn extract_path_from_stdout(stdout: &str, repo_path: &Path) -> Option<PathBuf> {
    stdout
        .split_whitespace()
        .filter(|token| token.ends_with(".json"))
        .find_map(|token| resolve_artifact_path(repo_path, token).ok())
}

/// Most recent audit artifact under `.wgx/out`, preferring
/// correlation-specific files over the generic one when mtimes tie.
pub fn latest_artifact(repo_path: &Path) -> Option<PathBuf> {
    let dir = repo_path.join(ARTIFACT_DIR);
    let generic = format!("{ARTIFACT_PREFIX}.json");
    let mut best: Option<(std::time::SystemTime, bool, PathBuf)> = None;
    for entry in fs::read_dir(&dir).ok()? {
        let entry = entry.ok()?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(ARTIFACT_PREFIX) || !name.ends_with(".json") {
            continue;
        }
        let specific = name.as_ref() != generic;
        let mtime = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let candidate = (mtime, specific, entry.path());
        if best.as_ref().is_none_or(|b| (candidate.0, candidate.1) > (b.0, b.1)) {
            best = Some(candidate);
        }
    }
    best.map(|(_, _, path)| path)
}

/// Run the audit tool and recover its report, from stdout first, then from
/// the correlation-specific artifact, then the generic one.
pub fn run_audit(
    runner: &dyn CommandRunner,
    repo_path: &Path,
    audit_bin: &str,
    correlation_id: &str,
) -> Result<(Value, ReportSource)> {
    let out = runner
        .run(
            &[audit_bin, "audit", "git", "--json"],
            repo_path,
            AUDIT_TIMEOUT,
            None,
        )
        .map_err(|err| PanelError::ToolOutput(err.to_string()))?;

    if let Some(report) = extract_json_from_stdout(&out.stdout) {
        return Ok((report, ReportSource::Stdout));
    }

    if let Some(path) = extract_path_from_stdout(&out.stdout, repo_path) {
        if let Some(report) = read_report(&path) {
            return Ok((report, ReportSource::Artifact));
        }
    }

    // Exit code is deliberately not consulted here: audit tools exit
    // non-zero on findings while still writing a valid artifact.
    let specific = repo_path.join(format!(
        "{ARTIFACT_DIR}/{ARTIFACT_PREFIX}.{correlation_id}.json"
    ));
    let generic = repo_path.join(format!("{ARTIFACT_DIR}/{ARTIFACT_PREFIX}.json"));
    for path in [&specific, &generic] {
        if let Some(report) = read_report(path) {
            return Ok((report, ReportSource::Artifact));
        }
    }

    Err(PanelError::ToolOutput(format!(
        "audit produced no readable report (exit code {}): {}",
        out.code,
        out.stderr.trim()
    )))
}

/// Read the newest audit artifact without running the tool.
pub fn read_latest_report(repo_path: &Path) -> Result<Value> {
    let path = latest_artifact(repo_path)
        .ok_or_else(|| PanelError::AuditArtifactNotFound(ARTIFACT_PREFIX.to_string()))?;
    read_report(&path)
        .ok_or_else(|| PanelError::AuditArtifactNotFound(path.display().to_string()))
}

// ---------------------------------------------------------------------------
// Job wrapper
// ---------------------------------------------------------------------------

pub struct AuditContext<'a> {
    pub jobs: &'a JobStore,
    pub runner: &'a dyn CommandRunner,
    pub log: &'a ActionLog,
    pub repo: &'a Repo,
    pub job_id: &'a str,
    pub correlation_id: &'a str,
    pub audit_bin: &'a str,
}

/// Run an audit as a job.
pub fn run_audit_job(ctx: &AuditContext<'_>) {
    ctx.jobs.set_status(ctx.job_id, JobStatus::Running);

    let base = ActionResult::new("audit.git", ctx.correlation_id).with_repo(&ctx.repo.key);

    match run_audit(ctx.runner, &ctx.repo.path, ctx.audit_bin, ctx.correlation_id) {
        Ok((report, source)) => {
            let verdict: std::result::Result<AuditReport, _> =
                serde_json::from_value(report.clone());
            let (job_status, message) = match &verdict {
                Ok(r) if r.status == AuditStatus::Error => {
                    (JobStatus::Error, "Audit reported errors".to_string())
                }
                Ok(r) if r.status == AuditStatus::Warn => {
                    (JobStatus::Done, "Audit reported warnings".to_string())
                }
                Ok(_) => (JobStatus::Done, "Audit passed".to_string()),
                // Shape we do not understand; hand the raw report through.
                Err(_) => (JobStatus::Done, "Audit report has unknown shape".to_string()),
            };
            let result = base
                .with_message(format!("{message} ({source:?} report)"))
                .with_audit(report);
            ctx.log.append(&result);
            ctx.jobs.record(ctx.job_id, result);
            ctx.jobs.set_status(ctx.job_id, job_status);
        }
        Err(err) => {
            let result = base.failed(ErrorKind::Internal, err.to_string());
            ctx.log.append(&result);
            ctx.jobs.record(ctx.job_id, result);
            ctx.jobs.set_status(ctx.job_id, JobStatus::Error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRunner;
    use serde_json::json;

    #[test]
    fn extracts_object_from_noisy_stream() {
        let noisy = "Scanning refs...\nprogress 3/3\n{\"status\": \"ok\", \"summary\": \"clean\"}\ntrailing noise";
        let value = extract_json_from_stdout(noisy).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[test]
    fn extraction_honors_braces_inside_strings() {
        let tricky = r#"note {"status": "warn", "summary": "weird } brace \" here"} done"#;
        let value = extract_json_from_stdout(tricky).unwrap();
        assert_eq!(value["status"], "warn");
        assert!(value["summary"].as_str().unwrap().contains('}'));
    }

    #[test]
    fn extraction_returns_none_without_object() {
        assert!(extract_json_from_stdout("no json here").is_none());
        assert!(extract_json_from_stdout("unbalanced { oops").is_none());
        assert!(extract_json_from_stdout("").is_none());
    }

    #[test]
    fn artifact_paths_reject_traversal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_artifact_path(dir.path(), "../../../etc/passwd").is_err());
        assert!(resolve_artifact_path(dir.path(), "/etc/passwd").is_err());
        assert!(resolve_artifact_path(dir.path(), "a/../b.json").is_err());

        let inner = dir.path().join(".wgx/out");
        std::fs::create_dir_all(&inner).unwrap();
        let file = inner.join("audit.git.v1.json");
        std::fs::write(&file, "{}").unwrap();
        let resolved = resolve_artifact_path(dir.path(), ".wgx/out/audit.git.v1.json").unwrap();
        assert_eq!(resolved, file);
    }

    #[test]
    fn stdout_report_wins_over_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().on(
            &["wgx", "audit", "git"],
            0,
            "{\"status\": \"ok\"}",
            "",
        );
        let (report, source) = run_audit(&runner, dir.path(), "wgx", "cid-1").unwrap();
        assert_eq!(source, ReportSource::Stdout);
        assert_eq!(report["status"], "ok");
    }

    #[test]
    fn artifact_path_on_stdout_is_resolved_inside_the_repo() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join(".wgx/out");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(
            out_dir.join("audit.git.v1.json"),
            r#"{"status": "warn", "summary": "from path"}"#,
        )
        .unwrap();

        let runner = MockRunner::new().on(
            &["wgx"],
            0,
            "wrote .wgx/out/audit.git.v1.json\n",
            "",
        );
        let (report, source) = run_audit(&runner, dir.path(), "wgx", "cid-9").unwrap();
        assert_eq!(source, ReportSource::Artifact);
        assert_eq!(report["summary"], "from path");

        // Paths escaping the repo are never followed.
        assert!(extract_path_from_stdout("/etc/passwd.json ../up.json", dir.path()).is_none());
    }

    #[test]
    fn artifact_fallback_prefers_correlation_specific_file() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join(".wgx/out");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(
            out_dir.join("audit.git.v1.json"),
            r#"{"status": "ok", "summary": "generic"}"#,
        )
        .unwrap();
        std::fs::write(
            out_dir.join("audit.git.v1.cid-2.json"),
            r#"{"status": "warn", "summary": "specific"}"#,
        )
        .unwrap();

        let runner = MockRunner::new().on(&["wgx"], 1, "no json, tool chattered", "");
        let (report, source) = run_audit(&runner, dir.path(), "wgx", "cid-2").unwrap();
        assert_eq!(source, ReportSource::Artifact);
        assert_eq!(report["summary"], "specific");
    }

    #[test]
    fn artifact_fallback_uses_generic_when_specific_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join(".wgx/out");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(
            out_dir.join("audit.git.v1.json"),
            r#"{"status": "ok", "summary": "generic"}"#,
        )
        .unwrap();

        let runner = MockRunner::new().on(&["wgx"], 1, "", "boom");
        let (report, _) = run_audit(&runner, dir.path(), "wgx", "cid-3").unwrap();
        assert_eq!(report["summary"], "generic");
    }

    #[test]
    fn no_report_anywhere_is_a_technical_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().on(&["wgx"], 2, "garbage", "tool exploded");
        let err = run_audit(&runner, dir.path(), "wgx", "cid-4").unwrap_err();
        assert!(err.to_string().contains("no readable report"));
    }

    fn job_harness() -> (JobStore, String, String, Repo) {
        let jobs = JobStore::new();
        let (job_id, correlation_id) = jobs.create();
        let repo = Repo {
            key: "metarepo".into(),
            path: tempfile::tempdir().unwrap().keep(),
            display: String::new(),
        };
        (jobs, job_id, correlation_id, repo)
    }

    #[test]
    fn error_verdict_keeps_action_ok_but_fails_the_job() {
        let (jobs, job_id, correlation_id, repo) = job_harness();
        let runner = MockRunner::new().on(
            &["wgx"],
            1,
            r#"{"status": "error", "summary": "dangling refs", "checks": []}"#,
            "",
        );
        let ctx = AuditContext {
            jobs: &jobs,
            runner: &runner,
            log: &ActionLog::disabled(),
            repo: &repo,
            job_id: &job_id,
            correlation_id: &correlation_id,
            audit_bin: "wgx",
        };
        run_audit_job(&ctx);

        let job = jobs.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        let r = &job.results[0];
        assert!(r.ok);
        assert_eq!(r.error_kind, None);
        assert_eq!(r.audit.as_ref().unwrap()["status"], "error");
    }

    #[test]
    fn warn_verdict_completes_the_job() {
        let (jobs, job_id, correlation_id, repo) = job_harness();
        let runner = MockRunner::new().on(
            &["wgx"],
            0,
            r#"{"status": "warn", "summary": "loose objects"}"#,
            "",
        );
        let ctx = AuditContext {
            jobs: &jobs,
            runner: &runner,
            log: &ActionLog::disabled(),
            repo: &repo,
            job_id: &job_id,
            correlation_id: &correlation_id,
            audit_bin: "wgx",
        };
        run_audit_job(&ctx);

        let job = jobs.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.results[0].ok);
    }

    #[test]
    fn technical_failure_marks_the_action_not_ok() {
        let (jobs, job_id, correlation_id, repo) = job_harness();
        let runner = MockRunner::new().on(&["wgx"], 3, "not json at all", "ran aground");
        let ctx = AuditContext {
            jobs: &jobs,
            runner: &runner,
            log: &ActionLog::disabled(),
            repo: &repo,
            job_id: &job_id,
            correlation_id: &correlation_id,
            audit_bin: "wgx",
        };
        run_audit_job(&ctx);

        let job = jobs.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        let r = &job.results[0];
        assert!(!r.ok);
        assert_eq!(r.error_kind, Some(ErrorKind::Internal));
    }

    #[test]
    fn report_round_trips_unknown_keys() {
        let raw = json!({
            "status": "ok",
            "summary": "fine",
            "checks": [{"id": "refs", "status": "ok"}],
            "tool_version": "1.4.2"
        });
        let report: AuditReport = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(report.extra["tool_version"], "1.4.2");
        let back = serde_json::to_value(&report).unwrap();
        assert_eq!(back, raw);
    }
}
