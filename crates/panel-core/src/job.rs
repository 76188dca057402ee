//! In-memory job store.
//!
//! One `Job` per accepted request; results are append-only and every
//! mutation happens under a single lock so status transitions and polls
//! never observe torn state. `get` hands back a deep clone, which keeps
//! polling idempotent: a terminal job serializes to identical bytes on
//! every read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::redact::redact_secrets;
use crate::result::ActionResult;

/// Caps protecting the in-memory store from runaway process output.
pub const MAX_STDOUT_CHARS: usize = 20_000;
pub const MAX_LOG_LINE_CHARS: usize = 4_000;
pub const MAX_JOB_LOG_LINES: usize = 500;

const TRUNCATION_MARK: &str = "... (truncated)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// Lifecycle container for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub correlation_id: String,
    pub results: Vec<ActionResult>,
    /// Trailing excerpt of the action log, for operator convenience.
    pub log_tail: Vec<String>,
}

/// Fresh correlation id, also usable for synchronous operations that never
/// create a job.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Shared, lock-protected map of jobs. Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<Mutex<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job in `pending` state; returns `(job_id, correlation_id)`.
    pub fn create(&self) -> (String, String) {
        let job_id = Uuid::new_v4().to_string();
        let correlation_id = new_correlation_id();
        let job = Job {
            job_id: job_id.clone(),
            status: JobStatus::Pending,
            correlation_id: correlation_id.clone(),
            results: Vec::new(),
            log_tail: Vec::new(),
        };
        self.inner
            .lock()
            .expect("job store poisoned")
            .insert(job_id.clone(), job);
        (job_id, correlation_id)
    }

    pub fn set_status(&self, job_id: &str, status: JobStatus) {
        let mut jobs = self.inner.lock().expect("job store poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = status;
        }
    }

    /// Append one result, redacting and truncating before it is stored.
    ///
    /// Both the stored result and the log line are sanitized: the job API
    /// serves `results` directly, so secrets must never survive into it.
    pub fn record(&self, job_id: &str, result: ActionResult) {
        let sanitized = sanitize(result);
        let log_line = cap(
            &serde_json::to_string(&sanitized).unwrap_or_default(),
            MAX_LOG_LINE_CHARS,
        );

        let mut jobs = self.inner.lock().expect("job store poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            job.results.push(sanitized);
            job.log_tail.push(log_line);
            if job.log_tail.len() > MAX_JOB_LOG_LINES {
                let excess = job.log_tail.len() - MAX_JOB_LOG_LINES;
                job.log_tail.drain(..excess);
            }
        }
    }

    /// Deep clone of the job, or `None` for unknown ids.
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.inner
            .lock()
            .expect("job store poisoned")
            .get(job_id)
            .cloned()
    }
}

fn sanitize(mut result: ActionResult) -> ActionResult {
    result.message = redact_secrets(&result.message);
    result.stdout = result
        .stdout
        .map(|s| cap(&redact_secrets(&s), MAX_STDOUT_CHARS));
    result.stderr = result
        .stderr
        .map(|s| cap(&redact_secrets(&s), MAX_STDOUT_CHARS));
    result
}

fn cap(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut capped: String = text.chars().take(limit).collect();
    capped.push_str(TRUNCATION_MARK);
    capped
}
