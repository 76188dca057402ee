use std::sync::Arc;

use jules_agent::AgentCli;
use panel_core::confirm::ConfirmTokenStore;
use panel_core::exec::{CommandRunner, SystemRunner};
use panel_core::job::JobStore;
use panel_core::logfile::{ActionLog, ActionLogConfig};
use panel_core::repos::RepoSet;

/// Server knobs read once at startup.
#[derive(Clone)]
pub struct Settings {
    pub routines_enabled: bool,
    pub routines_secret: Option<String>,
    pub audit_bin: String,
    pub routine_bin: String,
    pub rewrite_https_remote: bool,
    pub cors_origins: Option<Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            routines_enabled: false,
            routines_secret: None,
            audit_bin: panel_core::audit::DEFAULT_AUDIT_BIN.to_string(),
            routine_bin: panel_core::routine::DEFAULT_ROUTINE_BIN.to_string(),
            rewrite_https_remote: true,
            cors_origins: None,
        }
    }
}

// The shared secret must never reach logs, even through `{:?}`.
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("routines_enabled", &self.routines_enabled)
            .field(
                "routines_secret",
                &self.routines_secret.as_deref().map(|_| "[redacted]"),
            )
            .field("audit_bin", &self.audit_bin)
            .field("routine_bin", &self.routine_bin)
            .field("rewrite_https_remote", &self.rewrite_https_remote)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

fn truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            routines_enabled: std::env::var("PANEL_ENABLE_ROUTINES")
                .map(|v| truthy(&v))
                .unwrap_or(false),
            routines_secret: std::env::var("PANEL_ROUTINES_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            audit_bin: std::env::var("PANEL_AUDIT_BIN").unwrap_or(defaults.audit_bin),
            routine_bin: std::env::var("PANEL_ROUTINE_BIN").unwrap_or(defaults.routine_bin),
            rewrite_https_remote: std::env::var("PANEL_PUBLISH_REWRITE_REMOTE")
                .map(|v| truthy(&v))
                .unwrap_or(true),
            cors_origins: std::env::var("PANEL_CORS_ORIGINS").ok().map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            }),
        }
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub repos: Arc<RepoSet>,
    pub jobs: JobStore,
    pub tokens: Arc<ConfirmTokenStore>,
    pub action_log: Arc<ActionLog>,
    pub runner: Arc<dyn CommandRunner>,
    pub agent: Arc<AgentCli>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(repos: RepoSet, settings: Settings) -> Self {
        Self {
            repos: Arc::new(repos),
            jobs: JobStore::new(),
            tokens: Arc::new(ConfirmTokenStore::default()),
            action_log: Arc::new(ActionLog::new(ActionLogConfig::from_env())),
            runner: Arc::new(SystemRunner),
            agent: Arc::new(AgentCli::default()),
            settings: Arc::new(settings),
        }
    }

    /// State with injected collaborators, used by integration tests.
    pub fn with_parts(
        repos: RepoSet,
        runner: Arc<dyn CommandRunner>,
        agent: AgentCli,
        settings: Settings,
    ) -> Self {
        Self {
            repos: Arc::new(repos),
            jobs: JobStore::new(),
            tokens: Arc::new(ConfirmTokenStore::default()),
            action_log: Arc::new(ActionLog::disabled()),
            runner,
            agent: Arc::new(agent),
            settings: Arc::new(settings),
        }
    }
}
