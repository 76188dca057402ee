//! Subprocess invocation for git, gh, and the audit tool.
//!
//! Commands are always spawned with an explicit argument vector — never a
//! shell string — so embedded metacharacters reach the target program as
//! literal arguments. Timeouts are enforced per invocation by polling
//! `try_wait` against a deadline and killing the child on expiry.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Structured outcome of one completed external process.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CmdOutput {
    /// stdout and stderr concatenated, the way the operator sees it.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            (true, _) => self.stderr.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("'{program}' exceeded timeout of {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Execution seam for everything that shells out.
///
/// Production code uses [`SystemRunner`]; tests substitute a scripted
/// implementation so flows can be exercised without git, gh, or the audit
/// tool installed.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        argv: &[&str],
        cwd: &Path,
        timeout: Duration,
        stdin: Option<&str>,
    ) -> Result<CmdOutput, ExecError>;
}

/// [`CommandRunner`] backed by real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        argv: &[&str],
        cwd: &Path,
        timeout: Duration,
        stdin: Option<&str>,
    ) -> Result<CmdOutput, ExecError> {
        run(argv, cwd, timeout, stdin)
    }
}

/// Run `argv` in `cwd`, capturing both streams, with a hard timeout.
pub fn run(
    argv: &[&str],
    cwd: &Path,
    timeout: Duration,
    stdin: Option<&str>,
) -> Result<CmdOutput, ExecError> {
    let Some((first, args)) = argv.split_first() else {
        return Err(ExecError::Spawn {
            program: String::new(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty argument vector",
            ),
        });
    };
    let program = first.to_string();
    let start = Instant::now();

    let mut cmd = Command::new(&program);
    cmd.args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: program.clone(),
        source,
    })?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            // Ignore EPIPE: the child may exit without reading its input.
            let _ = pipe.write_all(input.as_bytes());
        }
    }

    let stdout_reader = spawn_drain(child.stdout.take());
    let stderr_reader = spawn_drain(child.stderr.take());

    let deadline = start + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExecError::Timeout { program, timeout });
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(source) => {
                return Err(ExecError::Spawn { program, source });
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    Ok(CmdOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

fn spawn_drain<R: Read + Send + 'static>(
    source: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut reader) = source {
            let _ = reader.read_to_string(&mut buf);
        }
        buf
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
