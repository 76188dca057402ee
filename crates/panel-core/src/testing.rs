//! Scripted [`CommandRunner`] for unit tests.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::exec::{CmdOutput, CommandRunner, ExecError};

type Responder = Box<dyn Fn(&[&str]) -> Result<CmdOutput, ExecError> + Send + Sync>;

struct Rule {
    prefix: Vec<String>,
    respond: Responder,
}

/// Matches invocations by argv prefix; unmatched commands succeed silently
/// with exit code 0, which keeps scripts focused on the interesting steps.
#[derive(Default)]
pub struct MockRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Vec<String>>>,
    stdins: Mutex<Vec<Option<String>>>,
}

pub fn out(code: i32, stdout: &str, stderr: &str) -> CmdOutput {
    CmdOutput {
        code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        duration: Duration::from_millis(1),
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, prefix: &[&str], code: i32, stdout: &str, stderr: &str) -> Self {
        let stdout = stdout.to_string();
        let stderr = stderr.to_string();
        self.rules.push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            respond: Box::new(move |_| Ok(out(code, &stdout, &stderr))),
        });
        self
    }

    pub fn on_fn(
        mut self,
        prefix: &[&str],
        f: impl Fn(&[&str]) -> Result<CmdOutput, ExecError> + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            respond: Box::new(f),
        });
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Stdin handed to each invocation, in call order.
    pub fn stdins(&self) -> Vec<Option<String>> {
        self.stdins.lock().unwrap().clone()
    }

    pub fn called_with_prefix(&self, prefix: &[&str]) -> bool {
        self.calls()
            .iter()
            .any(|argv| starts_with(argv, prefix))
    }
}

fn starts_with(argv: &[String], prefix: &[&str]) -> bool {
    argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
}

impl CommandRunner for MockRunner {
    fn run(
        &self,
        argv: &[&str],
        _cwd: &Path,
        _timeout: Duration,
        stdin: Option<&str>,
    ) -> Result<CmdOutput, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push(argv.iter().map(|s| s.to_string()).collect());
        self.stdins.lock().unwrap().push(stdin.map(String::from));
        for rule in &self.rules {
            let matches = argv.len() >= rule.prefix.len()
                && argv.iter().zip(&rule.prefix).all(|(a, p)| a == p);
            if matches {
                return (rule.respond)(argv);
            }
        }
        Ok(out(0, "", ""))
    }
}
