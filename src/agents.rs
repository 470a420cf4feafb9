//! Agent roles, backends, and the command registry.
//!
//! Roles are contractual: the planner and merger always run on the claude
//! backend; the reviewer and executor prefer codex and fall back to claude
//! once a task is rate-limited. The binaries behind each backend come from
//! configuration; the orchestrator only composes command lines.

use std::borrow::Cow;
use std::path::Path;

use crate::config::AgentCommands;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Claude,
    Codex,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Claude => "claude",
            Backend::Codex => "codex",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Planner,
    Reviewer,
    Executor,
    Merger,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Reviewer => "reviewer",
            Role::Executor => "executor",
            Role::Merger => "merger",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves (role, rate-limit flag) to a backend and composes launch
/// command lines from the configured templates.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    commands: AgentCommands,
}

impl AgentRegistry {
    pub fn new(commands: AgentCommands) -> Self {
        Self { commands }
    }

    /// Backend for a role, honoring the task's sticky rate-limit flag.
    pub fn backend_for(&self, role: Role, rate_limited: bool) -> Backend {
        match role {
            Role::Planner | Role::Merger => Backend::Claude,
            Role::Reviewer | Role::Executor => {
                if rate_limited {
                    Backend::Claude
                } else {
                    Backend::Codex
                }
            }
        }
    }

    /// Full `sh -c` command line for a backend and prompt.
    pub fn command_line(&self, backend: Backend, prompt: &str) -> String {
        let template = match backend {
            Backend::Claude => &self.commands.claude,
            Backend::Codex => &self.commands.codex,
        };
        let escaped = shell_escape::escape(Cow::Borrowed(prompt));
        template.replace("{prompt}", &escaped)
    }
}

/// Per-invocation log file name, matching the established layout under
/// `agent_logs/`: plan and review logs are keyed by draft number, exec and
/// merge logs by launch timestamp.
pub fn log_file_name(backend: Backend, role: Role, detail: &str) -> String {
    match role {
        Role::Planner => format!("{backend}-plan-v{detail}.log"),
        Role::Reviewer => format!("{backend}-review-{detail}.log"),
        Role::Executor => format!("{backend}-exec-{detail}.log"),
        Role::Merger => format!("{backend}-merge-{detail}.log"),
    }
}

/// Timestamp component for exec/merge log names.
pub fn log_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

// ---------------------------------------------------------------------------
// Prompts
//
// The orchestrator treats agents as opaque, but it owns the contract each
// role must honor: which file to produce, which sentinel to watch, which
// queue move signals completion. These prompts state that contract and
// nothing else.
// ---------------------------------------------------------------------------

pub fn planner_prompt(task_rel: &Path, version: u8) -> String {
    let ticket = task_rel.join("ticket.md");
    let plan = task_rel.join(format!("plan-v{version}.md"));
    if version == 1 {
        format!(
            "Read {} and write an implementation plan to {}. \
             Commit the plan file when done.",
            ticket.display(),
            plan.display()
        )
    } else {
        let previous = task_rel.join(format!("plan-v{}.md", version - 1));
        let feedback = task_rel.join(format!("feedback-{}.md", version - 1));
        format!(
            "Read {}, the previous plan {} and the review feedback {}. \
             Write a revised implementation plan to {}. Commit the plan file when done.",
            ticket.display(),
            previous.display(),
            feedback.display(),
            plan.display()
        )
    }
}

pub fn reviewer_prompt(task_rel: &Path, version: u8) -> String {
    let plan = task_rel.join(format!("plan-v{version}.md"));
    let feedback = task_rel.join(format!("feedback-{version}.md"));
    format!(
        "Review the implementation plan {} against the ticket in the same \
         directory. Write your feedback to {}. Commit the feedback file when done.",
        plan.display(),
        feedback.display()
    )
}

pub fn executor_prompt(task_rel: &Path, outbound_rel: &Path) -> String {
    let plan = task_rel.join("plan.md");
    format!(
        "Implement the plan in {}. Commit your changes as you go. \
         If a file named .merge-requested appears in the repository root, \
         commit what you have and stop. When the plan is fully implemented, \
         move the task directory {} to {} and commit, then exit.",
        plan.display(),
        task_rel.display(),
        outbound_rel.display()
    )
}

pub fn merger_prompt(outbound_rel: &Path, done_rel: &Path, mainline: &str) -> String {
    format!(
        "Integrate this branch: fetch the latest {mainline} and rebase onto it, \
         resolving conflicts if you can. On success, move the task directory {} \
         to {} and commit. If the conflicts are beyond repair, create a file \
         named .needs-manual-rebase in the repository root and exit.",
        outbound_rel.display(),
        done_rel.display()
    )
}
