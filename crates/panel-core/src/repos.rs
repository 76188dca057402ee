//! Static repository allowlist.
//!
//! Every repo-taking operation resolves its key against this closed set
//! before any job is created; unknown keys never reach a subprocess.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PanelError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub key: String,
    pub path: PathBuf,
    #[serde(default)]
    pub display: String,
}

#[derive(Debug, Default)]
pub struct RepoSet {
    repos: Vec<Repo>,
    by_key: HashMap<String, usize>,
}

impl RepoSet {
    pub fn new(repos: Vec<Repo>) -> Self {
        let by_key = repos
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key.clone(), i))
            .collect();
        Self { repos, by_key }
    }

    /// Load the allowlist from a YAML file: a top-level `repos` list of
    /// `{key, path, display}` entries.
    pub fn load(path: &Path) -> Result<Self> {
        #[derive(Deserialize)]
        struct File {
            repos: Vec<Repo>,
        }
        let raw = std::fs::read_to_string(path)?;
        let file: File = serde_yaml::from_str(&raw)?;
        Ok(Self::new(file.repos))
    }

    pub fn get(&self, key: &str) -> Result<&Repo> {
        self.by_key
            .get(key)
            .map(|&i| &self.repos[i])
            .ok_or_else(|| PanelError::RepoNotAllowed(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Repo> {
        self.repos.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> RepoSet {
        RepoSet::new(vec![
            Repo {
                key: "metarepo".into(),
                path: "/home/op/repos/metarepo".into(),
                display: "heimgewebe/metarepo".into(),
            },
            Repo {
                key: "wgx".into(),
                path: "/home/op/repos/wgx".into(),
                display: "heimgewebe/wgx".into(),
            },
        ])
    }

    #[test]
    fn known_key_resolves() {
        let repos = set();
        let repo = repos.get("metarepo").unwrap();
        assert_eq!(repo.display, "heimgewebe/metarepo");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = set().get("evil").unwrap_err();
        assert!(matches!(err, PanelError::RepoNotAllowed(k) if k == "evil"));
    }

    #[test]
    fn loads_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("repos.yaml");
        std::fs::write(
            &config,
            "repos:\n  - key: metarepo\n    path: /tmp/metarepo\n    display: org/metarepo\n",
        )
        .unwrap();
        let repos = RepoSet::load(&config).unwrap();
        assert_eq!(repos.get("metarepo").unwrap().path, PathBuf::from("/tmp/metarepo"));
    }
}
