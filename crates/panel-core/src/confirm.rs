//! Preview→apply confirmation handshake for mutating routines.
//!
//! A preview issues a single-use random token bound to the exact parameters
//! that were previewed (repo, routine, preview hash). Apply must present the
//! same triple; any mismatch consumes the token so it cannot be brute-forced.
//!
//! The store is process-local and in-memory. Horizontally scaled deployments
//! would see spurious `invalid_token` failures when preview and apply land on
//! different instances — a documented constraint of the single-host design.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(600);

struct TokenEntry {
    created: Instant,
    repo_key: String,
    routine_id: String,
    preview_hash: String,
}

/// In-memory single-use token store.
pub struct ConfirmTokenStore {
    entries: Mutex<HashMap<String, TokenEntry>>,
    ttl: Duration,
}

impl Default for ConfirmTokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

impl ConfirmTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh token bound to `(repo_key, routine_id, preview_hash)`.
    /// Expired entries are purged on every issue.
    pub fn issue(&self, repo_key: &str, routine_id: &str, preview_hash: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("token store poisoned");
        entries.retain(|_, e| now.duration_since(e.created) <= self.ttl);
        entries.insert(
            token.clone(),
            TokenEntry {
                created: now,
                repo_key: repo_key.to_string(),
                routine_id: routine_id.to_string(),
                preview_hash: preview_hash.to_string(),
            },
        );
        token
    }

    /// Validate and consume `token`. Returns `true` exactly once for a
    /// matching, unexpired triple. A mismatch also deletes the token.
    pub fn consume(
        &self,
        token: &str,
        repo_key: &str,
        routine_id: &str,
        preview_hash: &str,
    ) -> bool {
        let mut entries = self.entries.lock().expect("token store poisoned");
        let Some(entry) = entries.remove(token) else {
            return false;
        };
        if Instant::now().duration_since(entry.created) > self.ttl {
            return false;
        }
        entry.repo_key == repo_key
            && entry.routine_id == routine_id
            && entry.preview_hash == preview_hash
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Deterministic hash over the exact previewed payload.
///
/// `serde_json::Value` objects are BTreeMap-backed, so serialization is
/// canonical (sorted keys) without extra work.
pub fn preview_hash(value: &serde_json::Value) -> String {
    let canonical = value.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
