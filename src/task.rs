//! Per-task phase model and crash-safe persistence.
//!
//! The queue directory holding a task's ticket is the authoritative phase on
//! disk; `.task-state` inside the worktree carries what the queue cannot
//! express (planning iteration, rate-limit flag) and breaks ties on restart.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, bail};

use crate::agents::{Backend, Role};
use crate::supervisor::AgentProcess;

/// Name of the persisted state file inside each worktree.
pub const STATE_FILE: &str = ".task-state";
/// Sentinel asking a running agent to commit and exit.
pub const MERGE_REQUESTED_FILE: &str = ".merge-requested";
/// Sentinel parking a task for human rebase intervention.
pub const NEEDS_MANUAL_REBASE_FILE: &str = ".needs-manual-rebase";

/// Branch name for a task slug.
pub fn task_branch(slug: &str) -> String {
    format!("task/{slug}")
}

/// Worktree directory name for a task slug.
pub fn worktree_dir_name(slug: &str) -> String {
    format!("task-{slug}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Executing,
    Outbound,
    Merging,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "PLANNING",
            Phase::Executing => "EXECUTING",
            Phase::Outbound => "OUTBOUND",
            Phase::Merging => "MERGING",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Phase> {
        match s {
            "PLANNING" => Ok(Phase::Planning),
            "EXECUTING" => Ok(Phase::Executing),
            "OUTBOUND" => Ok(Phase::Outbound),
            "MERGING" => Ok(Phase::Merging),
            other => bail!("unknown task phase {other:?}"),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three persisted lines of `.task-state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskState {
    pub phase: Phase,
    pub iteration: u8,
    pub rate_limited: bool,
}

impl TaskState {
    /// Write the state file. Called after every phase or iteration
    /// transition so a crash at any point loses at most one transition.
    pub fn save(&self, worktree: &Path) -> anyhow::Result<()> {
        let content = format!("{}\n{}\n{}\n", self.phase, self.iteration, self.rate_limited);
        std::fs::write(worktree.join(STATE_FILE), content)
            .with_context(|| format!("failed to write {STATE_FILE} in {}", worktree.display()))
    }

    /// Read the state file, if present and well-formed.
    pub fn load(worktree: &Path) -> Option<TaskState> {
        let content = std::fs::read_to_string(worktree.join(STATE_FILE)).ok()?;
        let mut lines = content.lines();
        let phase = Phase::parse(lines.next()?.trim()).ok()?;
        let iteration = lines.next()?.trim().parse::<u8>().ok()?;
        let rate_limited = lines.next()?.trim().parse::<bool>().ok()?;
        if iteration > 3 {
            return None;
        }
        Some(TaskState {
            phase,
            iteration,
            rate_limited,
        })
    }
}

/// What the planning sub-state machine wants to do next.
///
/// Derived purely from which artifacts exist in the task directory, so a
/// restart lands on exactly the step the crash interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningStep {
    /// Launch the planner to write `plan-v<version>.md`.
    StartPlanner { version: u8 },
    /// Launch the reviewer to write `feedback-<version>.md`.
    StartReviewer { version: u8 },
    /// All three rounds done: promote `plan-v3.md` to `plan.md`.
    Finalize,
    /// Planning already complete (`plan.md` exists).
    Complete,
}

pub fn plan_version_path(task_dir: &Path, version: u8) -> PathBuf {
    task_dir.join(format!("plan-v{version}.md"))
}

pub fn feedback_path(task_dir: &Path, version: u8) -> PathBuf {
    task_dir.join(format!("feedback-{version}.md"))
}

pub fn final_plan_path(task_dir: &Path) -> PathBuf {
    task_dir.join("plan.md")
}

/// Evaluate the planning table against the artifacts in `task_dir`.
pub fn next_planning_step(task_dir: &Path) -> PlanningStep {
    if final_plan_path(task_dir).is_file() {
        return PlanningStep::Complete;
    }
    for version in 1..=3u8 {
        if !plan_version_path(task_dir, version).is_file() {
            return PlanningStep::StartPlanner { version };
        }
        if !feedback_path(task_dir, version).is_file() {
            return PlanningStep::StartReviewer { version };
        }
    }
    PlanningStep::Finalize
}

/// Planning iteration implied by the artifacts on disk: the number of plan
/// drafts written so far.
pub fn planning_iteration(task_dir: &Path) -> u8 {
    (1..=3u8)
        .take_while(|&v| plan_version_path(task_dir, v).is_file())
        .count() as u8
}

/// A live task owned by the scheduler.
///
/// Owns at most one child process at a time; the queue directory inside its
/// worktree stays consistent with `phase` after every tick.
pub struct ActiveTask {
    pub slug: String,
    pub worktree: PathBuf,
    pub branch: String,
    pub phase: Phase,
    pub iteration: u8,
    pub rate_limited: bool,
    pub agent: Option<AgentProcess>,
    /// Role and backend of the running agent, kept for the audit record
    /// written when it is reaped.
    pub agent_role: Option<Role>,
    pub agent_backend: Option<Backend>,
    /// Exit code of the most recently reaped agent, consumed by restart
    /// policy decisions.
    pub last_exit: Option<i32>,
    /// When `.merge-requested` was written, for the freeze timeout.
    pub freeze_requested_at: Option<Instant>,
}

impl ActiveTask {
    pub fn new(slug: String, worktree: PathBuf, state: TaskState) -> Self {
        let branch = task_branch(&slug);
        Self {
            slug,
            worktree,
            branch,
            phase: state.phase,
            iteration: state.iteration,
            rate_limited: state.rate_limited,
            agent: None,
            agent_role: None,
            agent_backend: None,
            last_exit: None,
            freeze_requested_at: None,
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState {
            phase: self.phase,
            iteration: self.iteration,
            rate_limited: self.rate_limited,
        }
    }

    pub fn save_state(&self) -> anyhow::Result<()> {
        self.state().save(&self.worktree)
    }

    /// Transition to `phase`, persist, and log the single annotated line the
    /// operator sees for this change.
    pub fn set_phase(&mut self, phase: Phase) -> anyhow::Result<()> {
        if self.phase != phase {
            log::info!("task {}: {} -> {}", self.slug, self.phase, phase);
            self.phase = phase;
        }
        self.save_state()
    }

    pub fn set_iteration(&mut self, iteration: u8) -> anyhow::Result<()> {
        if self.iteration != iteration {
            log::info!("task {}: planning iteration {}", self.slug, iteration);
            self.iteration = iteration;
        }
        self.save_state()
    }

    /// Mark the task rate-limited for the rest of its life and persist.
    pub fn mark_rate_limited(&mut self) -> anyhow::Result<()> {
        if !self.rate_limited {
            log::warn!(
                "task {}: primary agent quota exhausted; switching to backup",
                self.slug
            );
            self.rate_limited = true;
        }
        self.save_state()
    }

    pub fn agent_running(&mut self) -> bool {
        self.agent.as_mut().is_some_and(|a| a.is_alive())
    }

    pub fn merge_requested_path(&self) -> PathBuf {
        self.worktree.join(MERGE_REQUESTED_FILE)
    }

    pub fn needs_manual_rebase_path(&self) -> PathBuf {
        self.worktree.join(NEEDS_MANUAL_REBASE_FILE)
    }
}
