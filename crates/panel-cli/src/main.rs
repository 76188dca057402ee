use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use panel_core::repos::RepoSet;
use panel_server::state::{AppState, Settings};

#[derive(Parser)]
#[command(
    name = "panel",
    about = "Local control panel for agent sessions and guarded git publishing",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the panel server
    Serve {
        /// Port to listen on (loopback only)
        #[arg(long, default_value = "8099", env = "PANEL_PORT")]
        port: u16,

        /// Repo allowlist file (YAML with a top-level `repos:` list)
        #[arg(long, env = "PANEL_REPOS")]
        repos: PathBuf,
    },

    /// Validate a repo allowlist file and list its entries
    Check {
        /// Repo allowlist file
        #[arg(long, env = "PANEL_REPOS")]
        repos: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port, repos } => serve(port, &repos),
        Commands::Check { repos } => check(&repos),
    }
}

fn load_repos(path: &PathBuf) -> Result<RepoSet> {
    let repos = RepoSet::load(path)
        .with_context(|| format!("failed to load repo allowlist from {}", path.display()))?;
    if repos.is_empty() {
        bail!("repo allowlist {} contains no repos", path.display());
    }
    Ok(repos)
}

fn serve(port: u16, repos_path: &PathBuf) -> Result<()> {
    let repos = load_repos(repos_path)?;
    let state = AppState::new(repos, Settings::from_env());

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(panel_server::serve(state, port))
}

fn check(repos_path: &PathBuf) -> Result<()> {
    let repos = load_repos(repos_path)?;
    for repo in repos.iter() {
        let exists = repo.path.is_dir();
        println!(
            "{}\t{}\t{}",
            repo.key,
            repo.path.display(),
            if exists { "ok" } else { "missing" }
        );
    }
    Ok(())
}
