// Helpers are shared across test files; not every test uses every helper.
#![allow(dead_code)]

//! Test utilities for taskherd.
//!
//! `TestRepo` builds an isolated git repository in a temp directory with the
//! workspace queue tree committed on `main`, plus a sibling worktrees root.
//! Identity and signing are pinned via repo-local git config so both the
//! tests' own git calls and the library's subprocess calls behave the same
//! regardless of the host's global configuration.
//!
//! Agent binaries are stubbed with a generated `sh` script that honors the
//! orchestrator's prompt contract: write the named plan/feedback artifact,
//! or move the named task directory, then commit.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use taskherd::config::Config;
use taskherd::git::Repository;
use taskherd::workspace::{Queue, TICKET_FILE, Workspace};

pub struct TestRepo {
    temp: TempDir,
    pub root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();

        git_in(&root, &["init", "--quiet", "--initial-branch=main"]);
        git_in(&root, &["config", "user.name", "Test User"]);
        git_in(&root, &["config", "user.email", "test@example.com"]);
        git_in(&root, &["config", "commit.gpgsign", "false"]);

        std::fs::write(root.join("README.md"), "# test repo\n").unwrap();
        let ws = Workspace::new(root.join("workspace"));
        ws.ensure_layout().unwrap();
        // Git tracks files, not directories; pin the empty tree down.
        for queue in Queue::all() {
            std::fs::write(ws.queue_dir(queue).join(".gitkeep"), "").unwrap();
        }
        std::fs::write(ws.sessions_dir().join(".gitkeep"), "").unwrap();
        std::fs::write(ws.logs_dir().join(".gitkeep"), "").unwrap();
        git_in(&root, &["add", "-A"]);
        git_in(&root, &["commit", "-q", "-m", "initial workspace"]);

        Self { temp, root }
    }

    pub fn repo(&self) -> Repository {
        Repository::at(&self.root)
    }

    /// Config pointed at this repo's temp tree, with timeouts tightened for
    /// tests.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.worktrees_root = self.temp.path().join("worktrees");
        cfg.freeze_timeout_secs = 2;
        cfg.kill_grace_secs = 2;
        cfg
    }

    /// The mainline workspace view.
    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.root.join("workspace"))
    }

    /// Add a task to todo and commit it on main.
    pub fn add_todo_task(&self, slug: &str) {
        let dir = self.workspace().task_dir(Queue::Todo, slug);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TICKET_FILE), format!("# {slug}\n\nDo the thing.\n")).unwrap();
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", &format!("add ticket {slug}")]);
    }

    /// Write a file at the repo root and commit it on main.
    pub fn commit_file(&self, rel: &str, content: &str, message: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
    }

    /// Run git at the repo root, panicking on failure.
    pub fn git(&self, args: &[&str]) -> String {
        git_in(&self.root, args)
    }

    pub fn head_subject(&self) -> String {
        self.git(&["log", "-1", "--format=%s"])
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .current_dir(&self.root)
            .output()
            .unwrap()
            .status
            .success()
    }

    pub fn worktrees_root(&self) -> PathBuf {
        self.temp.path().join("worktrees")
    }

    /// Install the stub agent script and return the command template to use
    /// for both backends.
    pub fn stub_agent_template(&self) -> String {
        let bin = self.temp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("agent.sh");
        std::fs::write(&script, STUB_AGENT).unwrap();
        format!("sh {} {{prompt}}", script.display())
    }
}

/// Run git in an arbitrary directory, panicking with full output on failure.
pub fn git_in(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
    assert!(
        output.status.success(),
        "git {:?} failed in {}:\nstdout: {}\nstderr: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Stage-and-commit everything in a checkout (simulating an agent's own
/// commits).
pub fn commit_all_in(dir: &Path, message: &str) {
    git_in(dir, &["add", "-A"]);
    git_in(dir, &["commit", "-q", "-m", message]);
}

#[rstest::fixture]
pub fn repo() -> TestRepo {
    TestRepo::new()
}

/// Minimal agent honoring the prompt contract:
/// - a prompt naming a `plan-vN.md` / `feedback-N.md` artifact gets that
///   artifact written and committed;
/// - a prompt asking to move a task directory gets the move and a commit;
/// - anything else is a no-op success.
///
/// The artifact stays under the default watch threshold so tests exercise
/// the exit-code path; watch-file reaping has its own unit tests.
const STUB_AGENT: &str = r#"#!/bin/sh
set -e
prompt="$1"
artifact=$(printf '%s' "$prompt" | grep -oE '[^ ]*(plan-v[0-9]+|feedback-[0-9]+)\.md' | tail -n 1 || true)
if [ -n "$artifact" ]; then
  printf 'stub artifact\n' > "$artifact"
  git add -A
  git commit -q -m "stub: write $artifact" || true
  exit 0
fi
src=$(printf '%s' "$prompt" | sed -n 's/.*move the task directory \([^ ]*\) to \([^ ]*\) .*/\1/p')
dst=$(printf '%s' "$prompt" | sed -n 's/.*move the task directory \([^ ]*\) to \([^ ]*\) .*/\2/p')
if [ -n "$src" ] && [ -n "$dst" ]; then
  mkdir -p "$(dirname "$dst")"
  mv "$src" "$dst"
  git add -A
  git commit -q -m "stub: move task to $dst" || true
fi
exit 0
"#;
