use thiserror::Error;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("repo not allowed: {0}")]
    RepoNotAllowed(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("no audit artifact found for repo: {0}")]
    AuditArtifactNotFound(String),

    #[error("invalid branch name: {0}")]
    InvalidBranch(String),

    #[error("invalid routine id: {0}")]
    InvalidRoutine(String),

    #[error("refusing to operate on protected branch '{0}'; create a feature branch first")]
    ProtectedBranch(String),

    #[error("patch is empty")]
    EmptyPatch,

    #[error("patch does not apply: {0}")]
    PatchConflict(String),

    #[error("invalid, expired, or mismatched confirmation token")]
    InvalidToken,

    #[error("routines are disabled; set PANEL_ENABLE_ROUTINES=true to enable")]
    RoutinesDisabled,

    #[error("missing or invalid X-Panel-Actor-Token header")]
    ActorTokenRejected,

    #[error("command '{program}' failed to start: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    ToolOutput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PanelError>;
