//! Best-effort, append-only action log.
//!
//! One redacted JSON line per completed action, partitioned into one file
//! per UTC day. Logging must never fail a job: every error path here ends
//! in a `tracing::warn` and nothing else.

use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;

use crate::job::MAX_LOG_LINE_CHARS;
use crate::redact::redact_secrets;
use crate::result::ActionResult;

pub const ACTION_LOG_ENV: &str = "PANEL_ACTION_LOG";

#[derive(Debug, Clone)]
pub struct ActionLogConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl ActionLogConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            dir: None,
        }
    }

    /// `PANEL_ACTION_LOG` unset → disabled; a truthy value → default
    /// directory under the state dir; anything else → treated as a directory.
    pub fn from_env() -> Self {
        let Ok(value) = std::env::var(ACTION_LOG_ENV) else {
            return Self::disabled();
        };
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Self::disabled();
        }
        let dir = if matches!(normalized.as_str(), "1" | "true" | "yes" | "on") {
            default_log_dir()
        } else {
            Some(PathBuf::from(value))
        };
        Self { enabled: true, dir }
    }
}

fn default_log_dir() -> Option<PathBuf> {
    home::home_dir().map(|h| h.join(".local").join("state").join("agent-panel"))
}

/// Append-only JSONL sink for executed actions.
pub struct ActionLog {
    config: ActionLogConfig,
}

impl ActionLog {
    pub fn new(config: ActionLogConfig) -> Self {
        Self { config }
    }

    pub fn disabled() -> Self {
        Self::new(ActionLogConfig::disabled())
    }

    /// Current partition file: `actions-YYYY-MM-DD.jsonl` (UTC date).
    pub fn current_path(&self) -> Option<PathBuf> {
        let dir = self.config.dir.as_ref()?;
        let day = Utc::now().format("%Y-%m-%d");
        Some(dir.join(format!("actions-{day}.jsonl")))
    }

    /// Append one record. Best-effort: all failures degrade to a warning.
    pub fn append(&self, result: &ActionResult) {
        if !self.config.enabled {
            return;
        }
        let Some(path) = self.current_path() else {
            return;
        };

        let line = match serde_json::to_string(result) {
            Ok(json) => {
                let mut line = redact_secrets(&json);
                if line.chars().count() > MAX_LOG_LINE_CHARS {
                    line = line.chars().take(MAX_LOG_LINE_CHARS).collect();
                    line.push_str("... (truncated)");
                }
                line
            }
            Err(err) => {
                tracing::warn!("action log serialization failed: {err}");
                return;
            }
        };

        if let Err(err) = append_line(&path, &line) {
            tracing::warn!(path = %path.display(), "action log write failed: {err}");
        }
    }
}

fn append_line(path: &std::path::Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ActionResult;

    fn log_in(dir: &std::path::Path) -> ActionLog {
        ActionLog::new(ActionLogConfig {
            enabled: true,
            dir: Some(dir.to_path_buf()),
        })
    }

    #[test]
    fn appends_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        log.append(&ActionResult::new("git.push", "c1"));
        log.append(&ActionResult::new("git.publish", "c1"));

        let path = log.current_path().unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["action"], "git.push");
    }

    #[test]
    fn partition_file_carries_utc_date() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let name = log
            .current_path()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let day = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(name, format!("actions-{day}.jsonl"));
    }

    #[test]
    fn secrets_never_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        let secret = "ghp_SECRET12345678901234567890";
        let result = ActionResult::new("git.push", "c1").with_message(format!("leak {secret}"));
        log.append(&result);

        let content = std::fs::read_to_string(log.current_path().unwrap()).unwrap();
        assert!(!content.contains(secret));
        assert!(content.contains("[redacted]"));
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let log = ActionLog::disabled();
        // Must be a silent no-op.
        log.append(&ActionResult::new("git.push", "c1"));
        assert!(log.current_path().is_none());
    }

    #[test]
    fn unwritable_dir_does_not_panic() {
        let log = ActionLog::new(ActionLogConfig {
            enabled: true,
            dir: Some(PathBuf::from("/proc/no-such-dir/panel")),
        });
        log.append(&ActionResult::new("git.push", "c1"));
    }

    #[test]
    fn from_env_truthy_and_path_values() {
        std::env::set_var(ACTION_LOG_ENV, "/tmp/panel-logs");
        let config = ActionLogConfig::from_env();
        assert!(config.enabled);
        assert_eq!(config.dir, Some(PathBuf::from("/tmp/panel-logs")));

        std::env::set_var(ACTION_LOG_ENV, "true");
        let config = ActionLogConfig::from_env();
        assert!(config.enabled);

        std::env::remove_var(ACTION_LOG_ENV);
        assert!(!ActionLogConfig::from_env().enabled);
    }
}
