//! Per-task worktree lifecycle.
//!
//! Each task gets an isolated checkout at `<worktrees_root>/task-<slug>` on
//! branch `task/<slug>`. The branch is authoritative: the worktree directory
//! is always rebuilt from branch state, and whether an existing branch is
//! continued or reset depends on what evidence it carries.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::git::Repository;
use crate::task::{task_branch, worktree_dir_name};
use crate::workspace::sanitize_slug;

/// What `create` decided to do with the task branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchDecision {
    /// No branch yet: created from the mainline head.
    CreatedFromMainline,
    /// Branch existed but carried nothing worth keeping: reset to mainline.
    /// Planning output is cheap and deterministic; a stale draft diverging
    /// from current mainline is worth less than a fresh start.
    ResetToMainline,
    /// Branch is ahead and has execution logs committed: continue the work.
    PreservedProgress,
}

#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo: Repository,
    worktrees_root: PathBuf,
    mainline: String,
}

impl WorktreeManager {
    pub fn new(repo: Repository, worktrees_root: PathBuf, mainline: String) -> Self {
        Self {
            repo,
            worktrees_root,
            mainline,
        }
    }

    pub fn path_for(&self, slug: &str) -> PathBuf {
        self.worktrees_root.join(worktree_dir_name(slug))
    }

    /// Create (or re-create) the worktree for `slug`, deciding branch fate
    /// per the continuation rules. Returns the worktree path.
    pub fn create(&self, slug: &str) -> anyhow::Result<(PathBuf, BranchDecision)> {
        let slug = sanitize_slug(slug)?;
        let branch = task_branch(&slug);
        let path = self.path_for(&slug);

        self.repo.worktree_prune()?;

        // A leftover directory is always stale at this point: either a dead
        // registration or debris from a crashed run. Clear it both ways.
        if path.exists() {
            let _ = self.repo.worktree_remove(&path, true);
            if path.exists() {
                std::fs::remove_dir_all(&path)
                    .with_context(|| format!("failed to remove stale worktree {}", path.display()))?;
            }
            self.repo.worktree_prune()?;
        }

        let decision = if !self.repo.branch_exists(&branch) {
            self.repo.create_branch(&branch, &self.mainline)?;
            BranchDecision::CreatedFromMainline
        } else {
            let ahead = self.repo.ahead_count(&self.mainline, &branch)?;
            if ahead == 0 {
                self.repo.force_branch(&branch, &self.mainline)?;
                BranchDecision::ResetToMainline
            } else if self.has_execution_evidence(&branch)? {
                BranchDecision::PreservedProgress
            } else {
                self.repo.force_branch(&branch, &self.mainline)?;
                BranchDecision::ResetToMainline
            }
        };

        std::fs::create_dir_all(&self.worktrees_root)?;
        self.repo.worktree_add(&path, &branch)?;
        self.write_excludes(&path)?;
        log::info!("task {slug}: worktree at {} ({decision:?})", path.display());
        Ok((path, decision))
    }

    /// Keep orchestration sentinels out of agent commits: `git add -A` runs
    /// both here and in the agents, and none of these files belong in the
    /// squashed history.
    fn write_excludes(&self, path: &Path) -> anyhow::Result<()> {
        let exclude = self.repo.exclude_file_in(path)?;
        if let Some(parent) = exclude.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = std::fs::read_to_string(&exclude).unwrap_or_default();
        for entry in ["/.task-state", "/.merge-requested", "/.needs-manual-rebase"] {
            if !content.lines().any(|l| l == entry) {
                content.push_str(entry);
                content.push('\n');
            }
        }
        std::fs::write(&exclude, content)
            .with_context(|| format!("failed to write {}", exclude.display()))
    }

    /// Any execution log blob committed on the branch means an executor ran
    /// there; partial planning alone is discarded.
    fn has_execution_evidence(&self, branch: &str) -> anyhow::Result<bool> {
        let files = self.repo.files_on_branch(branch)?;
        Ok(files.iter().any(|f| is_execution_log(f)))
    }

    /// Remove the worktree directory and registration. Branch deletion is
    /// the merge pipeline's job; cleanup never touches refs.
    pub fn cleanup(&self, slug: &str) -> anyhow::Result<()> {
        let path = self.path_for(slug);
        if path.exists() {
            if self.repo.worktree_remove(&path, true).is_err() && path.exists() {
                std::fs::remove_dir_all(&path).with_context(|| {
                    format!("failed to remove worktree directory {}", path.display())
                })?;
            }
        }
        self.repo.worktree_prune()?;
        Ok(())
    }

    /// Whether an existing worktree is usable: directory present, git
    /// metadata attached, and `git status` exits cleanly.
    pub fn is_healthy(&self, path: &Path) -> bool {
        path.is_dir() && path.join(".git").exists() && self.repo.status_ok_in(path)
    }
}

fn is_execution_log(path: &str) -> bool {
    let Some((dir, file)) = path.rsplit_once('/') else {
        return false;
    };
    dir.ends_with("agent_logs") && file.contains("exec") && file.ends_with(".log")
}
