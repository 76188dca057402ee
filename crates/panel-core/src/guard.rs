//! Branch protection and branch-name validation.
//!
//! The protected set is hardcoded on purpose: refusing to mutate `main` or
//! `master` is a safety invariant of the panel, not an operator preference.

use crate::error::{PanelError, Result};

pub const PROTECTED_BRANCHES: [&str; 2] = ["main", "master"];

/// Case-sensitive membership in the protected set.
pub fn is_protected(branch: &str) -> bool {
    PROTECTED_BRANCHES.contains(&branch)
}

/// Deny mutating actions that target a protected branch.
pub fn check_target_branch(branch: &str) -> Result<()> {
    if is_protected(branch) {
        return Err(PanelError::ProtectedBranch(branch.to_string()));
    }
    Ok(())
}

/// Conservative subset of git's ref-name rules.
///
/// Rejects everything `git check-ref-format` would, plus backslashes, which
/// git on some platforms tolerates but no branch here should carry.
pub fn is_valid_branch_name(name: &str) -> bool {
    if name.is_empty() || name == "@" {
        return false;
    }
    if name.starts_with('-') || name.starts_with('/') || name.ends_with('/') {
        return false;
    }
    if name.ends_with(".lock") || name.ends_with('.') {
        return false;
    }
    if name.contains("..") || name.contains("//") || name.contains("/./") || name.contains("@{") {
        return false;
    }
    !name.chars().any(|c| {
        c.is_ascii_control()
            || matches!(c, ' ' | '\\' | ':' | '?' | '*' | '[' | '~' | '^')
    })
}
