//! Merge pipeline: rebase-then-squash integration of a finished task.
//!
//! The scheduler drives the protocol across ticks (freeze request, lock
//! acquisition, merge-agent supervision); this module owns the pieces that
//! touch the repository: residual-change commits during freeze, outcome
//! inspection after the merge agent exits, and the finalize sequence that
//! lands the squash commit on mainline and tears the task down.

use std::path::Path;

use anyhow::Context;

use crate::config::Config;
use crate::git::Repository;
use crate::task::{ActiveTask, NEEDS_MANUAL_REBASE_FILE};
use crate::workspace::{Queue, Workspace};
use crate::worktree::WorktreeManager;

/// Commit message used when the freeze protocol finds uncommitted changes.
pub const RESIDUE_COMMIT_MESSAGE: &str = "auto-commit residual changes before merge";

/// What the merge agent left behind in the worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAgentOutcome {
    /// Ticket moved to done: proceed to finalize.
    Completed,
    /// Agent gave up on conflicts: park the task.
    NeedsManualRebase,
    /// Neither signal: relaunch the agent.
    Incomplete,
}

/// Result of the finalize sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Squash commit landed on mainline; task fully torn down.
    Merged,
    /// Rebase attempts exhausted; `.needs-manual-rebase` written.
    Parked,
    /// Squash integration failed; task goes back to the queue head.
    Requeue,
}

pub struct MergePipeline<'a> {
    repo: &'a Repository,
    cfg: &'a Config,
    worktrees: &'a WorktreeManager,
}

impl<'a> MergePipeline<'a> {
    pub fn new(repo: &'a Repository, cfg: &'a Config, worktrees: &'a WorktreeManager) -> Self {
        Self {
            repo,
            cfg,
            worktrees,
        }
    }

    /// Commit whatever a terminated agent left uncommitted in the worktree.
    /// Returns true if a commit was created.
    pub fn commit_residue(&self, worktree: &Path) -> anyhow::Result<bool> {
        if !self.repo.is_dirty_in(worktree)? {
            return Ok(false);
        }
        self.repo.add_all_in(worktree)?;
        self.repo.commit_in(worktree, RESIDUE_COMMIT_MESSAGE)?;
        Ok(true)
    }

    /// Classify the worktree after the merge agent exited.
    pub fn inspect_agent_outcome(&self, task: &ActiveTask) -> MergeAgentOutcome {
        let ws = Workspace::new(self.cfg.workspace_in(&task.worktree));
        if ws.ticket_path(Queue::Done, &task.slug).is_file() {
            MergeAgentOutcome::Completed
        } else if task.needs_manual_rebase_path().is_file() {
            MergeAgentOutcome::NeedsManualRebase
        } else {
            MergeAgentOutcome::Incomplete
        }
    }

    /// Land the task on mainline. Caller holds the merge lock throughout.
    pub fn finalize(&self, task: &ActiveTask) -> anyhow::Result<FinalizeOutcome> {
        let slug = &task.slug;
        let branch = &task.branch;

        // The merge agent's output drain can trail its exit; rebase refuses
        // to run on the resulting dirty tree, so absorb stragglers first.
        self.commit_residue(&task.worktree)?;

        // Bring mainline current before rebasing against it.
        self.repo.checkout(&self.cfg.mainline)?;
        if let Some(remote) = self.remote() {
            self.repo.fetch(&remote)?;
            self.repo.pull_ff_only()?;
        }

        // Bounded rebase-before-merge: the merge agent already rebased once,
        // but mainline may have moved while we waited for the lock.
        let mut rebased = false;
        for attempt in 1..=self.cfg.rebase_attempts {
            if self.repo.rebase_in(&task.worktree, &self.cfg.mainline)? {
                rebased = true;
                break;
            }
            log::warn!(
                "task {slug}: rebase onto {} failed (attempt {attempt}/{})",
                self.cfg.mainline,
                self.cfg.rebase_attempts
            );
            let _ = self.commit_residue(&task.worktree);
        }
        if !rebased {
            std::fs::write(task.needs_manual_rebase_path(), "")
                .context("failed to write manual-rebase sentinel")?;
            log::error!("task {slug}: parked for manual rebase");
            return Ok(FinalizeOutcome::Parked);
        }

        let squashed_commits = self.repo.commits_between(&self.cfg.mainline, branch)?;

        if !self.repo.merge_squash(branch)? {
            log::error!("task {slug}: squash integrate failed; requeueing");
            return Ok(FinalizeOutcome::Requeue);
        }

        // The squash stages the branch tree, but the done/ directory is
        // copied explicitly as well so the mainline workspace is correct
        // even when the agent's final move landed in an odd state.
        let worktree_ws = Workspace::new(self.cfg.workspace_in(&task.worktree));
        let mainline_ws = Workspace::new(self.cfg.workspace_in(self.repo.root()));
        let done_src = worktree_ws.task_dir(Queue::Done, slug);
        let done_dst = mainline_ws.task_dir(Queue::Done, slug);
        if done_src.is_dir() {
            copy_dir_recursive(&done_src, &done_dst)?;
        }

        self.repo.add_all_in(self.repo.root())?;
        self.repo
            .commit_in(self.repo.root(), &squash_commit_message(slug, &squashed_commits))?;

        if let Some(remote) = self.remote() {
            if let Err(e) = self.repo.push_upstream(&remote, &self.cfg.mainline) {
                log::warn!("task {slug}: mainline push failed: {e:#}");
            }
        }

        self.teardown(task)?;
        log::info!("task {slug}: merged into {}", self.cfg.mainline);
        Ok(FinalizeOutcome::Merged)
    }

    /// Branch, worktree, and session cleanup after a successful integrate.
    fn teardown(&self, task: &ActiveTask) -> anyhow::Result<()> {
        self.worktrees.cleanup(&task.slug)?;
        self.repo.delete_branch(&task.branch)?;
        if let Some(remote) = self.remote() {
            if let Err(e) = self.repo.push_delete(&remote, &task.branch) {
                log::debug!("remote branch delete failed (usually fine): {e:#}");
            }
        }
        let mainline_ws = Workspace::new(self.cfg.workspace_in(self.repo.root()));
        clear_sessions(&mainline_ws, &task.slug)?;
        Ok(())
    }

    fn remote(&self) -> Option<String> {
        let name = self.cfg.remote.clone()?;
        if self.repo.has_remote(&name) {
            Some(name)
        } else {
            None
        }
    }
}

/// `complete task <slug>` plus the squashed commits in order.
pub fn squash_commit_message(slug: &str, commits: &[String]) -> String {
    let mut message = format!("complete task {slug}");
    if !commits.is_empty() {
        message.push_str("\n\nSquashed commits:\n");
        for line in commits {
            message.push_str("  ");
            message.push_str(line);
            message.push('\n');
        }
    }
    message
}

/// Remove `sessions/<slug>*` leftovers in the mainline workspace.
fn clear_sessions(ws: &Workspace, slug: &str) -> anyhow::Result<()> {
    let dir = ws.sessions_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(slug) {
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = result {
                log::debug!("failed to remove session file {}: {e}", path.display());
            }
        }
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dst)
        .with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// A worktree is parked when the manual-rebase sentinel is present.
pub fn is_parked(worktree: &Path) -> bool {
    worktree.join(NEEDS_MANUAL_REBASE_FILE).is_file()
}
