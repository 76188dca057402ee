//! Guarded patch application to a working tree.
//!
//! A patch lands in two passes: `git apply --check` validates it first, then
//! the real `git apply` runs with the same flags, both fed the patch over
//! stdin. The guard inspects the branch that is actually checked out, so a
//! patch can never touch `main` or `master` no matter what the caller
//! believes the repo state to be.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{PanelError, Result};
use crate::exec::CommandRunner;
use crate::guard;
use crate::repos::Repo;
use crate::result::ActionResult;

const BRANCH_TIMEOUT: Duration = Duration::from_secs(30);
const APPLY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyOptions {
    pub patch: String,
    #[serde(default)]
    pub three_way: bool,
}

/// Apply a patch to the repo's working tree after a `--check` pass.
///
/// A patch that fails either pass is a [`PanelError::PatchConflict`]; the
/// second pass can still fail after a clean check when the tree moved in
/// between.
pub fn apply_patch(
    runner: &dyn CommandRunner,
    repo: &Repo,
    opts: &ApplyOptions,
    correlation_id: &str,
) -> Result<ActionResult> {
    if opts.patch.trim().is_empty() {
        return Err(PanelError::EmptyPatch);
    }

    let branch = current_branch(runner, repo)?;
    guard::check_target_branch(&branch)?;

    let check = runner
        .run(
            &apply_argv(true, opts.three_way),
            &repo.path,
            APPLY_TIMEOUT,
            Some(&opts.patch),
        )
        .map_err(|err| PanelError::ToolOutput(err.to_string()))?;
    if check.code != 0 {
        return Err(PanelError::PatchConflict(check.combined()));
    }

    let out = runner
        .run(
            &apply_argv(false, opts.three_way),
            &repo.path,
            APPLY_TIMEOUT,
            Some(&opts.patch),
        )
        .map_err(|err| PanelError::ToolOutput(err.to_string()))?;
    if out.code != 0 {
        return Err(PanelError::PatchConflict(out.combined()));
    }

    Ok(ActionResult::new("patch.apply", correlation_id)
        .with_repo(&repo.key)
        .with_branch(&branch)
        .with_output(&out)
        .with_message(format!("Patch applied on '{branch}'")))
}

fn apply_argv(check: bool, three_way: bool) -> Vec<&'static str> {
    let mut argv = vec!["git", "apply"];
    if check {
        argv.push("--check");
    }
    if three_way {
        argv.push("--3way");
    }
    argv.push("-");
    argv
}

fn current_branch(runner: &dyn CommandRunner, repo: &Repo) -> Result<String> {
    let out = runner
        .run(
            &["git", "rev-parse", "--abbrev-ref", "HEAD"],
            &repo.path,
            BRANCH_TIMEOUT,
            None,
        )
        .map_err(|err| PanelError::ToolOutput(err.to_string()))?;
    if out.code != 0 {
        return Err(PanelError::ToolOutput(out.combined()));
    }
    Ok(out.stdout.trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRunner;
    use std::path::PathBuf;

    const PATCH: &str = "diff --git a/f b/f\nindex e69de29..d95f3ad 100644\n--- a/f\n+++ b/f\n@@ -0,0 +1 @@\n+content\n";

    fn repo() -> Repo {
        Repo {
            key: "metarepo".into(),
            path: PathBuf::from("/tmp/metarepo"),
            display: String::new(),
        }
    }

    fn on_branch(branch: &str) -> MockRunner {
        MockRunner::new().on(
            &["git", "rev-parse", "--abbrev-ref", "HEAD"],
            0,
            &format!("{branch}\n"),
            "",
        )
    }

    fn options(patch: &str) -> ApplyOptions {
        ApplyOptions {
            patch: patch.into(),
            three_way: false,
        }
    }

    #[test]
    fn checks_before_applying_and_feeds_the_patch_over_stdin() {
        let runner = on_branch("feature/x");
        let result = apply_patch(&runner, &repo(), &options(PATCH), "corr-1").unwrap();
        assert!(result.ok);
        assert_eq!(result.action, "patch.apply");
        assert_eq!(result.branch.as_deref(), Some("feature/x"));

        let calls = runner.calls();
        assert_eq!(calls[1], ["git", "apply", "--check", "-"]);
        assert_eq!(calls[2], ["git", "apply", "-"]);
        let stdins = runner.stdins();
        assert_eq!(stdins[1].as_deref(), Some(PATCH));
        assert_eq!(stdins[2].as_deref(), Some(PATCH));
    }

    #[test]
    fn three_way_flag_reaches_both_passes() {
        let runner = on_branch("feature/x");
        let opts = ApplyOptions {
            patch: PATCH.into(),
            three_way: true,
        };
        apply_patch(&runner, &repo(), &opts, "corr-1").unwrap();
        let calls = runner.calls();
        assert_eq!(calls[1], ["git", "apply", "--check", "--3way", "-"]);
        assert_eq!(calls[2], ["git", "apply", "--3way", "-"]);
    }

    #[test]
    fn protected_checkout_is_refused_before_any_apply() {
        let runner = on_branch("main");
        let err = apply_patch(&runner, &repo(), &options(PATCH), "corr-1").unwrap_err();
        assert!(matches!(err, PanelError::ProtectedBranch(b) if b == "main"));
        assert!(!runner.called_with_prefix(&["git", "apply"]));
    }

    #[test]
    fn empty_patch_is_rejected_without_running_git() {
        let runner = MockRunner::new();
        let err = apply_patch(&runner, &repo(), &options("  \n"), "corr-1").unwrap_err();
        assert!(matches!(err, PanelError::EmptyPatch));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn failed_check_is_a_conflict_and_skips_the_real_apply() {
        let runner = on_branch("feature/x").on(
            &["git", "apply", "--check"],
            1,
            "",
            "error: patch failed: f:1",
        );
        let err = apply_patch(&runner, &repo(), &options(PATCH), "corr-1").unwrap_err();
        match err {
            PanelError::PatchConflict(detail) => assert!(detail.contains("patch failed")),
            other => panic!("expected PatchConflict, got {other:?}"),
        }
        assert!(!runner.calls().iter().any(|c| c == &["git", "apply", "-"]));
    }

    #[test]
    fn apply_failure_after_clean_check_is_still_a_conflict() {
        let runner = on_branch("feature/x").on_fn(&["git", "apply"], |argv| {
            if argv.contains(&"--check") {
                Ok(crate::testing::out(0, "", ""))
            } else {
                Ok(crate::testing::out(1, "", "error: f: already exists"))
            }
        });
        let err = apply_patch(&runner, &repo(), &options(PATCH), "corr-1").unwrap_err();
        assert!(matches!(err, PanelError::PatchConflict(_)));
    }

    #[test]
    fn unreadable_head_is_a_tool_error() {
        let runner = MockRunner::new().on(
            &["git", "rev-parse"],
            128,
            "",
            "fatal: not a git repository",
        );
        let err = apply_patch(&runner, &repo(), &options(PATCH), "corr-1").unwrap_err();
        assert!(matches!(err, PanelError::ToolOutput(_)));
    }
}
