//! The canonical record of one executed step.
//!
//! `ok` reflects *technical* success only: the process ran and returned the
//! way the step expected. A diagnostic tool can run cleanly and still report
//! findings in its own payload; that distinction surfaces at the job level,
//! never by flipping `ok` on the step (see `audit::run_audit_job`).

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::exec::CmdOutput;

/// Failure taxonomy shared by steps and HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BranchGuard,
    Timeout,
    ProcessError,
    InvalidToken,
    NotFound,
    InvalidInput,
    Internal,
    RefLock,
    ResolveRefFailed,
    DanglingRef,
    RefRepairFailed,
    UpstreamUnavailable,
    UpstreamNonOrigin,
    UpstreamMissing,
    PrecheckFailed,
    UnrecognizedOutput,
}

/// Immutable record of one executed step within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub ok: bool,
    pub action: String,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub changed: Option<bool>,
    pub files: Option<Vec<String>>,
    pub pr_url: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub code: Option<i32>,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
    pub ts: String,
    pub duration_ms: Option<u64>,
    pub correlation_id: String,
    /// Nested payload for diagnostic actions (audit reports, routine results).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<serde_json::Value>,
}

impl ActionResult {
    /// Start a successful result; chain the `with_*` builders to fill it in.
    pub fn new(action: &str, correlation_id: &str) -> Self {
        Self {
            ok: true,
            action: action.to_string(),
            repo: None,
            branch: None,
            head: None,
            changed: None,
            files: None,
            pr_url: None,
            stdout: None,
            stderr: None,
            code: None,
            error_kind: None,
            message: String::new(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: None,
            correlation_id: correlation_id.to_string(),
            audit: None,
        }
    }

    pub fn with_repo(mut self, repo: &str) -> Self {
        self.repo = Some(repo.to_string());
        self
    }

    pub fn with_branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_string());
        self
    }

    pub fn with_head(mut self, head: Option<String>) -> Self {
        self.head = head;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Copy exit code and both streams from a finished process.
    pub fn with_output(mut self, out: &CmdOutput) -> Self {
        self.code = Some(out.code);
        if !out.stdout.is_empty() {
            self.stdout = Some(out.stdout.clone());
        }
        if !out.stderr.is_empty() {
            self.stderr = Some(out.stderr.clone());
        }
        self.duration_ms = Some(out.duration.as_millis() as u64);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_audit(mut self, payload: serde_json::Value) -> Self {
        self.audit = Some(payload);
        self
    }

    /// Mark the step failed with a taxonomy kind and operator-facing message.
    pub fn failed(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.ok = false;
        self.error_kind = Some(kind);
        self.message = message.into();
        self
    }

    /// Keep `ok=true` but attach an advisory kind (e.g. a non-origin
    /// upstream that changes which refs get compared).
    pub fn with_advisory(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.error_kind = Some(kind);
        self.message = message.into();
        self
    }
}
