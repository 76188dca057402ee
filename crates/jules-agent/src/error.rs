use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to run agent CLI: {0}")]
    Exec(#[from] panel_core::exec::ExecError),

    #[error("Agent CLI exited with code {code}: {detail}")]
    Cli { code: i32, detail: String },
}
