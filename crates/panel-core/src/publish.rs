//! The guarded publish flow: branch → commit → push → pull request.
//!
//! Each step is normalized into exactly one [`ActionResult`]; a failed write
//! step halts the remaining sequence. The branch guard runs before anything
//! mutates, and a denied job carries exactly one `branch_guard` result.
//!
//! Concurrent publishes against the same repository are not coordinated
//! here; the panel is operated one job at a time by a human. This is a
//! known race, not an invariant the core can lean on.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::exec::{CmdOutput, CommandRunner, ExecError};
use crate::guard;
use crate::job::{JobStatus, JobStore};
use crate::logfile::ActionLog;
use crate::repos::Repo;
use crate::result::{ActionResult, ErrorKind};

const GIT_TIMEOUT: Duration = Duration::from_secs(30);
const COMMIT_TIMEOUT: Duration = Duration::from_secs(60);
const PUSH_TIMEOUT: Duration = Duration::from_secs(120);
const GH_TIMEOUT: Duration = Duration::from_secs(60);

fn default_base() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOptions {
    pub branch: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_base")]
    pub base: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub diffstat: bool,
}

/// Everything a publish job needs, injected so tests can script the runner.
pub struct PublishContext<'a> {
    pub jobs: &'a JobStore,
    pub runner: &'a dyn CommandRunner,
    pub log: &'a ActionLog,
    pub repo: &'a Repo,
    pub job_id: &'a str,
    pub correlation_id: &'a str,
    /// Rewrite an https origin to ssh before pushing (on by default; the
    /// panel host authenticates with ssh keys, not stored https credentials).
    pub rewrite_https_remote: bool,
}

impl PublishContext<'_> {
    fn record(&self, result: ActionResult) -> bool {
        let ok = result.ok;
        self.log.append(&result);
        self.jobs.record(self.job_id, result);
        ok
    }

    fn result(&self, action: &str) -> ActionResult {
        ActionResult::new(action, self.correlation_id).with_repo(&self.repo.key)
    }

    fn finish(&self, all_ok: bool) {
        let status = if all_ok { JobStatus::Done } else { JobStatus::Error };
        self.jobs.set_status(self.job_id, status);
    }

    fn fail_with(&self, result: ActionResult) {
        self.record(result);
        self.finish(false);
    }
}

/// Run the full publish sequence for one job. Never panics and never
/// returns an error: every failure path lands in the job as a result.
pub fn execute_publish(ctx: &PublishContext<'_>, opts: &PublishOptions) {
    ctx.jobs.set_status(ctx.job_id, JobStatus::Running);

    if !guard::is_valid_branch_name(&opts.branch) {
        ctx.fail_with(
            ctx.result("git.branch")
                .failed(ErrorKind::InvalidInput, "Invalid branch name"),
        );
        return;
    }

    // Safety invariant: a denied job carries exactly one result and no
    // later step ever runs.
    if let Err(err) = guard::check_target_branch(&opts.branch) {
        ctx.fail_with(
            ctx.result("git.branch")
                .with_branch(&opts.branch)
                .failed(ErrorKind::BranchGuard, err.to_string()),
        );
        return;
    }

    let mut all_ok = true;

    if !step_branch(ctx, opts) {
        ctx.finish(false);
        return;
    }
    if !step_commit(ctx, opts) {
        ctx.finish(false);
        return;
    }
    if !step_remote_protocol(ctx) {
        ctx.finish(false);
        return;
    }
    if !step_push(ctx) {
        ctx.finish(false);
        return;
    }
    if !step_gh_available(ctx) {
        ctx.finish(false);
        return;
    }

    // Upstream resolution is a reporting step: it may record a not-ok
    // result (which fails the job overall) but the remaining read-only
    // comparison still runs so the operator sees the full picture.
    let head_branch = resolve_upstream_branch(ctx, opts, &mut all_ok);

    if !step_fetch_refs(ctx, opts, &head_branch) {
        ctx.finish(false);
        return;
    }
    if !step_precheck_commits(ctx, opts, &head_branch) {
        ctx.finish(false);
        return;
    }
    if !step_publish_pr(ctx, opts, &head_branch) {
        ctx.finish(false);
        return;
    }

    ctx.finish(all_ok);
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn step_branch(ctx: &PublishContext<'_>, opts: &PublishOptions) -> bool {
    let branch = opts.branch.as_str();
    let (current, head) = get_git_state(ctx.runner, &ctx.repo.path);

    if current.as_deref() == Some(branch) {
        return ctx.record(
            ctx.result("git.branch")
                .with_branch(branch)
                .with_head(head)
                .with_message(format!("Already on '{branch}'")),
        );
    }

    match run_step(ctx, &["git", "checkout", "-b", branch], GIT_TIMEOUT) {
        Ok(out) if out.code == 0 => {}
        Ok(_) => {
            // Branch exists; switch instead of creating.
            match run_step(ctx, &["git", "checkout", branch], GIT_TIMEOUT) {
                Ok(out) if out.code == 0 => {}
                Ok(out) => {
                    return ctx.record(
                        ctx.result("git.branch")
                            .with_branch(branch)
                            .with_output(&out)
                            .failed(ErrorKind::ProcessError, "git checkout failed"),
                    );
                }
                Err(err) => return ctx.record(exec_failure(ctx, "git.branch", err)),
            }
        }
        Err(err) => return ctx.record(exec_failure(ctx, "git.branch", err)),
    }

    let (_, head) = get_git_state(ctx.runner, &ctx.repo.path);
    ctx.record(
        ctx.result("git.branch")
            .with_branch(branch)
            .with_head(head)
            .with_message(format!("Checked out '{branch}'")),
    )
}

fn step_commit(ctx: &PublishContext<'_>, opts: &PublishOptions) -> bool {
    match run_step(ctx, &["git", "add", "-A"], COMMIT_TIMEOUT) {
        Ok(out) if out.code == 0 => {}
        Ok(out) => {
            return ctx.record(
                ctx.result("git.commit")
                    .with_output(&out)
                    .failed(ErrorKind::ProcessError, "git add failed"),
            );
        }
        Err(err) => return ctx.record(exec_failure(ctx, "git.commit", err)),
    }

    let message = opts
        .message
        .clone()
        .unwrap_or_else(|| format!("panel: publish {}", opts.branch));

    let out = match run_step(ctx, &["git", "commit", "-m", &message], COMMIT_TIMEOUT) {
        Ok(out) => out,
        Err(err) => return ctx.record(exec_failure(ctx, "git.commit", err)),
    };

    let combined = out.combined();
    if out.code == 0 {
        let files = commit_files(ctx, opts);
        let mut result = ctx
            .result("git.commit")
            .with_branch(&opts.branch)
            .with_output(&out)
            .with_message("Committed staged changes");
        result.changed = Some(true);
        result.files = files;
        ctx.record(result)
    } else if combined.contains("nothing to commit") {
        // A clean tree is a benign no-op, but the message must make it
        // distinguishable from a real commit.
        let mut result = ctx
            .result("git.commit")
            .with_branch(&opts.branch)
            .with_output(&out)
            .with_message("Nothing to commit; working tree clean");
        result.changed = Some(false);
        ctx.record(result)
    } else {
        ctx.record(
            ctx.result("git.commit")
                .with_output(&out)
                .failed(ErrorKind::ProcessError, "git commit failed"),
        )
    }
}

fn commit_files(ctx: &PublishContext<'_>, opts: &PublishOptions) -> Option<Vec<String>> {
    if !opts.diffstat {
        return None;
    }
    match run_step(
        ctx,
        &["git", "diff", "--name-only", "HEAD~1", "HEAD"],
        GIT_TIMEOUT,
    ) {
        Ok(out) if out.code == 0 => Some(
            out.stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
        ),
        // First commit in a repo has no parent; skip the listing.
        _ => None,
    }
}

fn step_remote_protocol(ctx: &PublishContext<'_>) -> bool {
    let out = match run_step(ctx, &["git", "remote", "get-url", "origin"], GIT_TIMEOUT) {
        Ok(out) if out.code == 0 => out,
        // No origin configured: let the push step surface the real error.
        _ => return true,
    };
    let url = out.stdout.trim().to_string();
    if get_remote_protocol(&url) != RemoteProtocol::Https {
        return true;
    }

    let Some(ssh_url) = https_remote_to_ssh(&url) else {
        return ctx.record(ctx.result("git.remote.protocol").failed(
            ErrorKind::PrecheckFailed,
            format!("https remote '{url}' is not a github.com URL; cannot rewrite to ssh"),
        ));
    };

    if !ctx.rewrite_https_remote {
        return ctx.record(ctx.result("git.remote.protocol").failed(
            ErrorKind::PrecheckFailed,
            "origin uses https; pushing requires ssh and remote rewriting is disabled",
        ));
    }

    match run_step(
        ctx,
        &["git", "remote", "set-url", "origin", &ssh_url],
        GIT_TIMEOUT,
    ) {
        Ok(out) if out.code == 0 => ctx.record(
            ctx.result("git.remote.rewrite")
                .with_message(format!("Rewrote origin to '{ssh_url}'")),
        ),
        Ok(out) => ctx.record(
            ctx.result("git.remote.rewrite")
                .with_output(&out)
                .failed(ErrorKind::ProcessError, "git remote set-url failed"),
        ),
        Err(err) => ctx.record(exec_failure(ctx, "git.remote.rewrite", err)),
    }
}

fn step_push(ctx: &PublishContext<'_>) -> bool {
    let out = match run_step(ctx, &["git", "push", "-u", "origin", "HEAD"], PUSH_TIMEOUT) {
        Ok(out) => out,
        Err(err) => return ctx.record(exec_failure(ctx, "git.push", err)),
    };
    if out.code == 0 {
        return ctx.record(
            ctx.result("git.push")
                .with_output(&out)
                .with_message("Pushed to origin"),
        );
    }

    let result = match classify_git_ref_error(&out.combined()) {
        Some(class) => ctx
            .result("git.push")
            .with_output(&out)
            .failed(class.kind, class.hint),
        None => ctx
            .result("git.push")
            .with_output(&out)
            .failed(ErrorKind::ProcessError, "git push failed"),
    };
    ctx.record(result)
}

fn step_gh_available(ctx: &PublishContext<'_>) -> bool {
    match run_step(ctx, &["gh", "--version"], GH_TIMEOUT) {
        Ok(out) if out.code == 0 => {}
        Ok(out) => {
            return ctx.record(
                ctx.result("gh.version")
                    .with_output(&out)
                    .failed(ErrorKind::ProcessError, "gh is not available"),
            );
        }
        Err(err) => return ctx.record(exec_failure(ctx, "gh.version", err)),
    }
    match run_step(ctx, &["gh", "auth", "status"], GH_TIMEOUT) {
        Ok(out) if out.code == 0 => true,
        Ok(out) => ctx.record(
            ctx.result("gh.auth")
                .with_output(&out)
                .failed(ErrorKind::ProcessError, "gh is not authenticated"),
        ),
        Err(err) => ctx.record(exec_failure(ctx, "gh.auth", err)),
    }
}

/// Work out which remote branch the PR should come from.
///
/// Records a `git.branch.upstream` result only when something is off:
/// a non-origin upstream (advisory, `ok=true`), no upstream configured
/// (advisory), or an unreadable upstream (`ok=false`, fails the job overall
/// while the remaining read-only steps still report).
fn resolve_upstream_branch(
    ctx: &PublishContext<'_>,
    opts: &PublishOptions,
    all_ok: &mut bool,
) -> String {
    let out = match run_step(
        ctx,
        &["git", "rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
        GIT_TIMEOUT,
    ) {
        Ok(out) => out,
        Err(_) => {
            *all_ok = false;
            ctx.record(ctx.result("git.branch.upstream").failed(
                ErrorKind::UpstreamUnavailable,
                format!("Upstream not available for '{}'", opts.branch),
            ));
            return opts.branch.clone();
        }
    };

    if out.code != 0 {
        *all_ok = false;
        ctx.record(
            ctx.result("git.branch.upstream")
                .with_output(&out)
                .failed(
                    ErrorKind::UpstreamUnavailable,
                    format!("Upstream not available for '{}'", opts.branch),
                ),
        );
        return opts.branch.clone();
    }

    let upstream = out.stdout.trim();
    if upstream.is_empty() {
        ctx.record(ctx.result("git.branch.upstream").with_advisory(
            ErrorKind::UpstreamMissing,
            format!("No upstream configured for '{}'; comparing by branch name", opts.branch),
        ));
        return opts.branch.clone();
    }

    match upstream.split_once('/') {
        Some(("origin", branch)) => branch.to_string(),
        Some(_) | None => {
            ctx.record(ctx.result("git.branch.upstream").with_advisory(
                ErrorKind::UpstreamNonOrigin,
                format!("Upstream '{upstream}' is non-origin; comparing by branch name"),
            ));
            opts.branch.clone()
        }
    }
}

fn step_fetch_refs(ctx: &PublishContext<'_>, opts: &PublishOptions, head_branch: &str) -> bool {
    let base_ref = format!("{}:refs/remotes/origin/{}", opts.base, opts.base);
    let head_ref = format!("{head_branch}:refs/remotes/origin/{head_branch}");
    let out = match run_step(
        ctx,
        &["git", "fetch", "origin", &base_ref, &head_ref],
        PUSH_TIMEOUT,
    ) {
        Ok(out) => out,
        Err(err) => return ctx.record(exec_failure(ctx, "git.fetch", err)),
    };
    if out.code == 0 {
        return true;
    }
    let result = match classify_git_ref_error(&out.combined()) {
        Some(class) => ctx
            .result("git.fetch")
            .with_output(&out)
            .failed(class.kind, class.hint),
        None => ctx
            .result("git.fetch")
            .with_output(&out)
            .failed(ErrorKind::ProcessError, "git fetch failed"),
    };
    ctx.record(result)
}

fn step_precheck_commits(
    ctx: &PublishContext<'_>,
    opts: &PublishOptions,
    head_branch: &str,
) -> bool {
    let range = format!("origin/{}..origin/{head_branch}", opts.base);
    let out = match run_step(ctx, &["git", "rev-list", "--count", &range], GIT_TIMEOUT) {
        Ok(out) => out,
        Err(err) => return ctx.record(exec_failure(ctx, "git.pr.precheck", err)),
    };
    if out.code != 0 {
        return ctx.record(
            ctx.result("git.pr.precheck")
                .with_output(&out)
                .failed(ErrorKind::ProcessError, "git rev-list failed"),
        );
    }
    let count: u64 = out.stdout.trim().parse().unwrap_or(0);
    if count == 0 {
        // A PR with zero commits would be rejected by the host anyway;
        // abort before gh pr create.
        return ctx.record(ctx.result("git.pr.precheck").with_output(&out).failed(
            ErrorKind::PrecheckFailed,
            format!("No commits in {range}; nothing to publish"),
        ));
    }
    true
}

fn step_publish_pr(ctx: &PublishContext<'_>, opts: &PublishOptions, head_branch: &str) -> bool {
    if let Some(url) = find_existing_pr_url(ctx.runner, &ctx.repo.path, head_branch, &opts.base) {
        let mut result = ctx
            .result("git.publish")
            .with_branch(head_branch)
            .with_message(format!("Pull request already exists: {url}"));
        result.pr_url = Some(url);
        return ctx.record(result);
    }

    let title = opts
        .title
        .clone()
        .or_else(|| opts.message.clone())
        .unwrap_or_else(|| head_branch.to_string());
    let body = opts.body.clone().unwrap_or_default();

    let mut argv = vec![
        "gh", "pr", "create", "--base", &opts.base, "--head", head_branch, "--title", &title,
        "--body", &body,
    ];
    if opts.draft {
        argv.push("--draft");
    }

    let out = match run_step(ctx, &argv, GH_TIMEOUT) {
        Ok(out) => out,
        Err(err) => return ctx.record(exec_failure(ctx, "git.publish", err)),
    };
    if out.code != 0 {
        return ctx.record(
            ctx.result("git.publish")
                .with_output(&out)
                .failed(ErrorKind::ProcessError, "gh pr create failed"),
        );
    }

    let pr_url = extract_pr_url(&out.combined());
    let message = match &pr_url {
        Some(url) => format!("Created pull request: {url}"),
        None => "Pull request created (no URL found in gh output)".to_string(),
    };
    let mut result = ctx
        .result("git.publish")
        .with_branch(head_branch)
        .with_output(&out)
        .with_message(message);
    result.pr_url = pr_url;
    ctx.record(result)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn run_step(
    ctx: &PublishContext<'_>,
    argv: &[&str],
    timeout: Duration,
) -> Result<CmdOutput, ExecError> {
    ctx.runner.run(argv, &ctx.repo.path, timeout, None)
}

fn exec_failure(ctx: &PublishContext<'_>, action: &str, err: ExecError) -> ActionResult {
    let kind = match err {
        ExecError::Timeout { .. } => ErrorKind::Timeout,
        ExecError::Spawn { .. } => ErrorKind::ProcessError,
    };
    ctx.result(action).failed(kind, err.to_string())
}

/// Parse `git status --porcelain=v2 -b` into `(branch, head_sha)`.
///
/// Detached or unknown heads report branch `HEAD`; an unborn branch reports
/// `head = None`.
pub fn get_git_state(runner: &dyn CommandRunner, cwd: &Path) -> (Option<String>, Option<String>) {
    let out = match runner.run(
        &["git", "status", "--porcelain=v2", "-b"],
        cwd,
        GIT_TIMEOUT,
        None,
    ) {
        Ok(out) if out.code == 0 => out,
        _ => return (None, None),
    };

    let mut branch = None;
    let mut head = None;
    for line in out.stdout.lines() {
        if let Some(oid) = line.strip_prefix("# branch.oid ") {
            head = match oid.trim() {
                "(initial)" => None,
                sha => Some(sha.to_string()),
            };
        } else if let Some(name) = line.strip_prefix("# branch.head ") {
            branch = match name.trim() {
                "(detached)" | "(unknown)" => Some("HEAD".to_string()),
                name => Some(name.to_string()),
            };
        }
    }
    // Output carried an oid but no usable head line: treat as detached.
    if branch.is_none() && head.is_some() {
        branch = Some("HEAD".to_string());
    }
    (branch, head)
}

static PR_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://github\.com/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+/pull/\d+")
        .expect("valid regex")
});

/// First GitHub PR URL embedded in `text`, if any.
pub fn extract_pr_url(text: &str) -> Option<String> {
    PR_URL.find(text).map(|m| m.as_str().to_string())
}

/// Ask `gh pr list` whether a PR for `head` against `base` already exists.
pub fn find_existing_pr_url(
    runner: &dyn CommandRunner,
    cwd: &Path,
    head: &str,
    base: &str,
) -> Option<String> {
    let out = runner
        .run(
            &["gh", "pr", "list", "--head", head, "--base", base, "--json", "url"],
            cwd,
            GH_TIMEOUT,
            None,
        )
        .ok()?;
    if out.code != 0 {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_str(out.stdout.trim()).ok()?;
    parsed
        .as_array()?
        .first()?
        .get("url")?
        .as_str()
        .map(String::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteProtocol {
    Https,
    Ssh,
    Unknown,
}

pub fn get_remote_protocol(url: &str) -> RemoteProtocol {
    if url.starts_with("https://") || url.starts_with("http://") {
        RemoteProtocol::Https
    } else if url.starts_with("git@") || url.starts_with("ssh://") {
        RemoteProtocol::Ssh
    } else {
        RemoteProtocol::Unknown
    }
}

/// Convert a github.com https remote to its ssh form. Other hosts return
/// `None`; the rewrite is only known-safe for GitHub.
pub fn https_remote_to_ssh(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://github.com/")
        .or_else(|| url.strip_prefix("http://github.com/"))?;
    let rest = rest.trim_end_matches('/').trim_end_matches(".git");
    let (org, repo) = rest.split_once('/')?;
    if org.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some(format!("git@github.com:{org}/{repo}.git"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefErrorClass {
    pub kind: ErrorKind,
    pub hint: &'static str,
    pub affected_ref: Option<String>,
}

static REF_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"refs/[^\s':]+").expect("valid regex"));

/// Classify git stderr describing local ref corruption, so repair routines
/// can be suggested instead of a bare process error.
pub fn classify_git_ref_error(text: &str) -> Option<RefErrorClass> {
    let affected_ref = REF_NAME.find(text).map(|m| m.as_str().to_string());
    if text.contains("cannot lock ref") {
        return Some(RefErrorClass {
            kind: ErrorKind::RefLock,
            hint: "Unable to lock local ref; remote tracking refs may be inconsistent.",
            affected_ref,
        });
    }
    if text.contains("unable to resolve reference") {
        return Some(RefErrorClass {
            kind: ErrorKind::ResolveRefFailed,
            hint: "Unable to resolve local ref; remote tracking refs may be inconsistent.",
            affected_ref,
        });
    }
    if text.contains("has become dangling") {
        return Some(RefErrorClass {
            kind: ErrorKind::DanglingRef,
            hint: "Local ref has become dangling; remote tracking refs may be inconsistent.",
            affected_ref,
        });
    }
    if text.contains("packed refs are corrupt") {
        return Some(RefErrorClass {
            kind: ErrorKind::RefRepairFailed,
            hint: "Packed refs appear corrupt; repacking refs may be required.",
            affected_ref: None,
        });
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
