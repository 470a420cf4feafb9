//! Workspace layout and task store.
//!
//! The workspace is a directory tree committed to the repository, so every
//! worktree carries its own copy. The queue a task directory sits in *is*
//! its phase on disk:
//!
//! ```text
//! workspace/
//!   tasks/{todo,in-progress,outbound,done}/<slug>/ticket.md
//!   sessions/
//!   logs/
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

pub const TICKET_FILE: &str = "ticket.md";

/// The four task queues, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Todo,
    InProgress,
    Outbound,
    Done,
}

impl Queue {
    pub fn dir_name(self) -> &'static str {
        match self {
            Queue::Todo => "todo",
            Queue::InProgress => "in-progress",
            Queue::Outbound => "outbound",
            Queue::Done => "done",
        }
    }

    pub fn all() -> [Queue; 4] {
        [Queue::Todo, Queue::InProgress, Queue::Outbound, Queue::Done]
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Validate and normalize a task slug.
///
/// Slugs name directories and branches, so path separators and traversal
/// sequences are rejected outright.
pub fn sanitize_slug(raw: &str) -> anyhow::Result<String> {
    if raw.is_empty() {
        bail!("task slug is empty");
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("task slug {raw:?} contains characters outside [A-Za-z0-9_-]");
    }
    // Redundant with the charset check, but cheap and explicit about intent.
    if raw.contains("..") || raw.contains('/') || raw.contains('\\') {
        bail!("task slug {raw:?} looks like a path");
    }
    Ok(raw.to_string())
}

/// View of one workspace tree (at the repo root or inside a worktree).
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the queue tree, sessions, and logs directories.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for queue in Queue::all() {
            std::fs::create_dir_all(self.queue_dir(queue))
                .with_context(|| format!("failed to create {} queue", queue))?;
        }
        std::fs::create_dir_all(self.sessions_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    pub fn queue_dir(&self, queue: Queue) -> PathBuf {
        self.root.join("tasks").join(queue.dir_name())
    }

    pub fn task_dir(&self, queue: Queue, slug: &str) -> PathBuf {
        self.queue_dir(queue).join(slug)
    }

    pub fn ticket_path(&self, queue: Queue, slug: &str) -> PathBuf {
        self.task_dir(queue, slug).join(TICKET_FILE)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Which queue currently holds `slug` (by ticket presence).
    pub fn queue_of(&self, slug: &str) -> Option<Queue> {
        Queue::all()
            .into_iter()
            .find(|&q| self.ticket_path(q, slug).is_file())
    }

    /// Slugs present in `queue` (with a ticket), sorted lexicographically.
    pub fn list_queue(&self, queue: Queue) -> anyhow::Result<Vec<String>> {
        let dir = self.queue_dir(queue);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut slugs = BTreeSet::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read queue {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().join(TICKET_FILE).is_file() {
                slugs.insert(name);
            }
        }
        Ok(slugs.into_iter().collect())
    }

    /// Move a task directory between queues. The rename is atomic; the
    /// caller commits the move in whatever checkout this workspace lives in.
    pub fn move_task(&self, slug: &str, from: Queue, to: Queue) -> anyhow::Result<()> {
        let src = self.task_dir(from, slug);
        let dst = self.task_dir(to, slug);
        std::fs::create_dir_all(self.queue_dir(to))?;
        std::fs::rename(&src, &dst).with_context(|| {
            format!(
                "failed to move task {slug} from {} to {}",
                from.dir_name(),
                to.dir_name()
            )
        })?;
        log::debug!("task {slug}: {from} -> {to}");
        Ok(())
    }
}

/// Whether `selector` picks `slug`.
///
/// A selector matches its slug exactly. A bare integer selector
/// matches the slug whose four-digit zero-padded prefix equals it
/// (`5` matches `0005` and `0005-anything`).
pub fn selector_matches(selector: &str, slug: &str) -> bool {
    if selector == slug {
        return true;
    }
    if !selector.is_empty() && selector.chars().all(|c| c.is_ascii_digit()) {
        let padded = format!("{:0>4}", selector);
        return slug == padded || slug.starts_with(&format!("{padded}-"));
    }
    false
}

/// Picks tasks from the todo queue, honoring startup priority selectors.
#[derive(Debug)]
pub struct TaskStore {
    workspace: Workspace,
    selectors: Vec<String>,
}

impl TaskStore {
    pub fn new(workspace: Workspace, selectors: Vec<String>) -> Self {
        Self {
            workspace,
            selectors,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Next task to admit, or `None` when todo holds nothing eligible.
    ///
    /// Selectors are consulted in declaration order; a selector is popped
    /// when its first match is chosen, and discarded when it matches nothing
    /// in a full todo scan. With no live selectors the fallback is
    /// lexicographic slug order.
    pub fn pick_next<F>(&mut self, is_excluded: F) -> anyhow::Result<Option<String>>
    where
        F: Fn(&str) -> bool,
    {
        let todo: Vec<String> = self
            .workspace
            .list_queue(Queue::Todo)?
            .into_iter()
            .filter(|slug| !is_excluded(slug))
            .collect();
        if todo.is_empty() {
            return Ok(None);
        }

        while !self.selectors.is_empty() {
            let selector = self.selectors.remove(0);
            if let Some(found) = todo.iter().find(|slug| selector_matches(&selector, slug)) {
                return Ok(Some(found.clone()));
            }
            log::debug!("priority selector {selector:?} matched no todo task; discarded");
        }

        Ok(todo.first().cloned())
    }
}
