//! Orchestrator configuration.
//!
//! Loaded from an optional `herd.toml` at the repository root. Every field
//! has a default, so a missing file yields a fully working configuration;
//! CLI flags override file values where both exist (`-j`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "herd.toml";

/// Top-level configuration.
///
/// `worktrees_root` is resolved relative to the repository root, so the
/// default `../worktrees` lands beside the repository rather than inside it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Workspace directory inside the repository holding the task queues.
    pub workspace_dir: String,
    /// Where per-task worktrees are created (relative to the repo root).
    pub worktrees_root: PathBuf,
    /// Integration branch.
    pub mainline: String,
    /// Remote to push to / delete task branches from. `None` = fully local.
    pub remote: Option<String>,
    /// Concurrency ceiling for active tasks (merges serialize separately).
    pub max_concurrent: usize,
    pub tick_interval_secs: u64,
    /// How long a task may stay busy after `.merge-requested` before the
    /// supervisor terminates it.
    pub freeze_timeout_secs: u64,
    /// Grace between SIGTERM and SIGKILL.
    pub kill_grace_secs: u64,
    /// Rebase-before-merge attempts before parking a task.
    pub rebase_attempts: u32,
    /// Watch-file mode: minimum artifact size before the idling planner or
    /// reviewer is reaped.
    pub plan_watch_min_bytes: u64,
    pub agents: AgentCommands,
}

/// Command templates for the agent backends. `{prompt}` is replaced with the
/// shell-escaped prompt text; the result runs under `sh -c` in the worktree.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentCommands {
    pub claude: String,
    pub codex: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: "workspace".to_string(),
            worktrees_root: PathBuf::from("../worktrees"),
            mainline: "main".to_string(),
            remote: None,
            max_concurrent: 3,
            tick_interval_secs: 5,
            freeze_timeout_secs: 60,
            kill_grace_secs: 30,
            rebase_attempts: 3,
            plan_watch_min_bytes: 200,
            agents: AgentCommands::default(),
        }
    }
}

impl Default for AgentCommands {
    fn default() -> Self {
        Self {
            claude: "claude -p {prompt}".to_string(),
            codex: "codex exec {prompt}".to_string(),
        }
    }
}

impl Config {
    /// Load `herd.toml` from the repository root, or defaults if absent.
    pub fn load(repo_root: &Path) -> anyhow::Result<Self> {
        let path = repo_root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn freeze_timeout(&self) -> Duration {
        Duration::from_secs(self.freeze_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    /// Absolute workspace root inside the given checkout (repo root or a
    /// task worktree; the tree layout is identical in both).
    pub fn workspace_in(&self, checkout: &Path) -> PathBuf {
        checkout.join(&self.workspace_dir)
    }

    /// Absolute worktrees root.
    pub fn worktrees_root_in(&self, repo_root: &Path) -> PathBuf {
        if self.worktrees_root.is_absolute() {
            self.worktrees_root.clone()
        } else {
            repo_root.join(&self.worktrees_root)
        }
    }
}
