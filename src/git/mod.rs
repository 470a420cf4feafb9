//! Thin adapter over the git CLI.
//!
//! Every version-control operation the orchestrator performs goes through
//! [`Repository`]. Each method is a pure function of its arguments and a
//! working directory: run a git subcommand, capture stdout/stderr/exit, and
//! return trimmed output or a [`GitError`]. Nothing here caches repository
//! state; the scheduler polls, so answers must be fresh.

mod error;

pub use error::GitError;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context;

/// Handle on a git repository rooted at a fixed directory.
///
/// Commands run either at the repository root (`run`) or in an arbitrary
/// directory such as a linked worktree (`run_in`). The distinction matters:
/// branch surgery and mainline integration happen at the root, while
/// per-task commits happen inside the task's worktree.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run git in `dir`, requiring success. Returns trimmed stdout.
    pub fn run_in(&self, dir: &Path, args: &[&str]) -> anyhow::Result<String> {
        let output = self.output_in(dir, args)?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: command_string(args),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run git at the repository root, requiring success.
    pub fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let root = self.root.clone();
        self.run_in(&root, args)
    }

    /// Run git in `dir` without judging the exit status.
    ///
    /// This is the single execution choke point: all git invocations flow
    /// through here so `-v` shows every command with its directory context.
    pub fn output_in(&self, dir: &Path, args: &[&str]) -> anyhow::Result<Output> {
        log::debug!("$ {} [{}]", command_string(args), dir_context(dir));
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .with_context(|| format!("failed to execute: {}", command_string(args)))
    }

    /// Run git at the root without judging the exit status.
    pub fn output(&self, args: &[&str]) -> anyhow::Result<Output> {
        let root = self.root.clone();
        self.output_in(&root, args)
    }

    // =========================================================================
    // Branches
    // =========================================================================

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.output(&[
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ])
        .map(|o| o.status.success())
        .unwrap_or(false)
    }

    pub fn create_branch(&self, branch: &str, start: &str) -> anyhow::Result<()> {
        self.run(&["branch", branch, start])?;
        Ok(())
    }

    /// Reset (or create) `branch` to point at `start`.
    pub fn force_branch(&self, branch: &str, start: &str) -> anyhow::Result<()> {
        self.run(&["branch", "-f", branch, start])?;
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str) -> anyhow::Result<()> {
        self.run(&["branch", "-D", branch])?;
        Ok(())
    }

    pub fn rev_parse(&self, reference: &str) -> anyhow::Result<String> {
        self.run(&["rev-parse", "--verify", reference])
    }

    /// Number of commits on `branch` that are not on `base`.
    pub fn ahead_count(&self, base: &str, branch: &str) -> anyhow::Result<usize> {
        let out = self.run(&["rev-list", "--count", &format!("{base}..{branch}")])?;
        out.parse::<usize>()
            .map_err(|_| GitError::Parse(format!("rev-list --count returned {out:?}")).into())
    }

    /// One-line summaries of commits in `base..branch`, oldest first.
    pub fn commits_between(&self, base: &str, branch: &str) -> anyhow::Result<Vec<String>> {
        let out = self.run(&["log", "--oneline", "--reverse", &format!("{base}..{branch}")])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// All blob paths reachable from the tip tree of `branch`.
    pub fn files_on_branch(&self, branch: &str) -> anyhow::Result<Vec<String>> {
        let out = self.run(&["ls-tree", "-r", "--name-only", branch])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    // =========================================================================
    // Worktrees
    // =========================================================================

    pub fn worktree_add(&self, path: &Path, branch: &str) -> anyhow::Result<()> {
        let path_str = path_str(path)?;
        self.run(&["worktree", "add", path_str, branch])?;
        Ok(())
    }

    pub fn worktree_remove(&self, path: &Path, force: bool) -> anyhow::Result<()> {
        let path_str = path_str(path)?;
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str);
        self.run(&args)?;
        Ok(())
    }

    pub fn worktree_prune(&self) -> anyhow::Result<()> {
        self.run(&["worktree", "prune"])?;
        Ok(())
    }

    // =========================================================================
    // Working tree state
    // =========================================================================

    /// Whether `dir` has staged, unstaged, or untracked changes.
    pub fn is_dirty_in(&self, dir: &Path) -> anyhow::Result<bool> {
        let out = self.run_in(dir, &["status", "--porcelain"])?;
        Ok(!out.is_empty())
    }

    /// Like [`is_dirty_in`](Self::is_dirty_in), scoped to one pathspec.
    pub fn is_dirty_path_in(&self, dir: &Path, pathspec: &str) -> anyhow::Result<bool> {
        let out = self.run_in(dir, &["status", "--porcelain", "--", pathspec])?;
        Ok(!out.is_empty())
    }

    /// Branch checked out in `dir`, or `HEAD` when detached.
    pub fn current_branch_in(&self, dir: &Path) -> anyhow::Result<String> {
        self.run_in(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Per-worktree exclude file (`<git-dir>/info/exclude`), resolved for
    /// linked worktrees as well as the main checkout.
    pub fn exclude_file_in(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let out = self.run_in(dir, &["rev-parse", "--git-path", "info/exclude"])?;
        let path = PathBuf::from(out);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(dir.join(path))
        }
    }

    /// Whether `git status` completes cleanly in `dir` (worktree health probe).
    pub fn status_ok_in(&self, dir: &Path) -> bool {
        self.output_in(dir, &["status", "--porcelain"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn add_all_in(&self, dir: &Path) -> anyhow::Result<()> {
        self.run_in(dir, &["add", "-A"])?;
        Ok(())
    }

    pub fn add_path_in(&self, dir: &Path, pathspec: &str) -> anyhow::Result<()> {
        self.run_in(dir, &["add", "-A", "--", pathspec])?;
        Ok(())
    }

    pub fn commit_in(&self, dir: &Path, message: &str) -> anyhow::Result<()> {
        self.run_in(dir, &["commit", "-m", message])?;
        Ok(())
    }

    pub fn checkout(&self, branch: &str) -> anyhow::Result<()> {
        self.run(&["checkout", branch])?;
        Ok(())
    }

    // =========================================================================
    // Integration
    // =========================================================================

    pub fn has_remote(&self, name: &str) -> bool {
        self.run(&["remote"])
            .map(|out| out.lines().any(|r| r == name))
            .unwrap_or(false)
    }

    pub fn fetch(&self, remote: &str) -> anyhow::Result<()> {
        self.run(&["fetch", remote])?;
        Ok(())
    }

    pub fn pull_ff_only(&self) -> anyhow::Result<()> {
        self.run(&["pull", "--ff-only"])?;
        Ok(())
    }

    /// Rebase the branch checked out in `dir` onto `onto`. Returns false and
    /// aborts cleanly when the rebase stops on conflicts.
    pub fn rebase_in(&self, dir: &Path, onto: &str) -> anyhow::Result<bool> {
        let output = self.output_in(dir, &["rebase", onto])?;
        if output.status.success() {
            return Ok(true);
        }
        // Leave nothing half-applied; the caller decides whether to retry.
        let _ = self.output_in(dir, &["rebase", "--abort"]);
        Ok(false)
    }

    /// Squash-merge `branch` into the branch checked out at the root.
    /// Returns false and aborts the merge state on failure.
    pub fn merge_squash(&self, branch: &str) -> anyhow::Result<bool> {
        let output = self.output(&["merge", "--squash", branch])?;
        if output.status.success() {
            return Ok(true);
        }
        let _ = self.output(&["merge", "--abort"]);
        Ok(false)
    }

    pub fn push_upstream(&self, remote: &str, branch: &str) -> anyhow::Result<()> {
        self.run(&["push", "-u", remote, branch])?;
        Ok(())
    }

    pub fn push_delete(&self, remote: &str, branch: &str) -> anyhow::Result<()> {
        self.run(&["push", remote, "--delete", branch])?;
        Ok(())
    }
}

fn command_string(args: &[&str]) -> String {
    format!("git {}", args.join(" "))
}

/// Short directory label for command logging ("." for cwd-like paths).
fn dir_context(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string())
}

fn path_str(path: &Path) -> anyhow::Result<&str> {
    path.to_str()
        .ok_or_else(|| GitError::Parse(format!("path is not valid UTF-8: {}", path.display())).into())
}
