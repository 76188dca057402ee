pub mod audit;
pub mod git;
pub mod jobs;
pub mod routines;
pub mod sessions;

use serde::Deserialize;

/// Query string for repo-scoped GET endpoints.
#[derive(Deserialize)]
pub struct RepoQuery {
    pub repo: String,
}
