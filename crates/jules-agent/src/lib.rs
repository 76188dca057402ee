//! `jules-agent` — driver for the collaborating agent's CLI subprocess.
//!
//! The panel never talks to the agent service directly; it shells out to the
//! locally installed `jules` binary inside the target repository and
//! normalizes whatever comes back. The CLI surface is unstable, so the
//! diff-retrieval subcommand is configurable rather than hard-coded.

use std::path::Path;
use std::time::Duration;

use panel_core::exec::CommandRunner;

pub mod error;

pub use error::AgentError;

pub type Result<T> = std::result::Result<T, AgentError>;

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const NEW_TIMEOUT: Duration = Duration::from_secs(60);
const PULL_TIMEOUT: Duration = Duration::from_secs(180);

/// What a session diff pull actually returned.
///
/// `pull` without `--apply` prints the patch to stdout, but the CLI also
/// prints help text or progress chatter when a session has nothing to give.
/// Callers must handle all three shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutput {
    /// A unified diff starting at the first `diff --git` header.
    Patch(String),
    /// The command succeeded but produced no patch content.
    Empty,
    /// Non-empty output with no recognizable diff in it.
    Unrecognized(String),
}

#[derive(Debug, Clone)]
pub struct AgentCli {
    pub bin: String,
    /// Subcommand used to fetch a session's patch; the session id is
    /// appended as the final argument.
    pub pull_args: Vec<String>,
}

impl Default for AgentCli {
    fn default() -> Self {
        Self {
            bin: "jules".to_string(),
            pull_args: vec![
                "remote".to_string(),
                "pull".to_string(),
                "--session".to_string(),
            ],
        }
    }
}

impl AgentCli {
    /// Raw session listing as the CLI prints it.
    pub fn list_sessions(&self, runner: &dyn CommandRunner, cwd: &Path) -> Result<String> {
        let out = runner.run(
            &[&self.bin, "remote", "list", "--session"],
            cwd,
            LIST_TIMEOUT,
            None,
        )?;
        if out.code != 0 {
            return Err(AgentError::Cli {
                code: out.code,
                detail: out.combined(),
            });
        }
        Ok(out.combined())
    }

    /// Start a new session with the given task title.
    pub fn new_session(&self, runner: &dyn CommandRunner, cwd: &Path, title: &str) -> Result<String> {
        let out = runner.run(&[&self.bin, "new", title], cwd, NEW_TIMEOUT, None)?;
        if out.code != 0 {
            return Err(AgentError::Cli {
                code: out.code,
                detail: out.combined(),
            });
        }
        Ok(out.combined())
    }

    /// Fetch the patch for a session without applying it.
    pub fn pull_diff(
        &self,
        runner: &dyn CommandRunner,
        cwd: &Path,
        session_id: &str,
    ) -> Result<DiffOutput> {
        let mut argv: Vec<&str> = Vec::with_capacity(self.pull_args.len() + 2);
        argv.push(&self.bin);
        argv.extend(self.pull_args.iter().map(String::as_str));
        argv.push(session_id);

        let out = runner.run(&argv, cwd, PULL_TIMEOUT, None)?;
        if out.code != 0 {
            return Err(AgentError::Cli {
                code: out.code,
                detail: out.combined(),
            });
        }
        Ok(normalize_patch(&out.combined()))
    }
}

/// Strip leading chatter and classify the remainder.
///
/// Everything before the first `diff --git` line is progress output and is
/// dropped. No such line means the text is not a patch at all.
pub fn normalize_patch(output: &str) -> DiffOutput {
    if output.trim().is_empty() {
        return DiffOutput::Empty;
    }
    let lines: Vec<&str> = output.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        if line.starts_with("diff --git") {
            return DiffOutput::Patch(lines[idx..].join("\n").trim().to_string());
        }
    }
    DiffOutput::Unrecognized(output.to_string())
}
