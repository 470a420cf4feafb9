//! Worktree manager: creation, branch decisions, cleanup, health.

use rstest::rstest;

use taskherd::task::task_branch;
use taskherd::workspace::{Queue, Workspace};
use taskherd::worktree::{BranchDecision, WorktreeManager};

use crate::common::{TestRepo, commit_all_in, repo};

fn manager(repo: &TestRepo) -> WorktreeManager {
    WorktreeManager::new(repo.repo(), repo.worktrees_root(), "main".to_string())
}

/// Move the ticket to in-progress inside the worktree and commit, like
/// admission does.
fn begin_task(worktree: &std::path::Path, slug: &str) -> std::path::PathBuf {
    let ws = Workspace::new(worktree.join("workspace"));
    ws.move_task(slug, Queue::Todo, Queue::InProgress).unwrap();
    commit_all_in(worktree, &format!("start task {slug}"));
    ws.task_dir(Queue::InProgress, slug)
}

#[rstest]
fn create_makes_branch_and_checkout(repo: TestRepo) {
    repo.add_todo_task("0001-a");
    let wm = manager(&repo);

    let (path, decision) = wm.create("0001-a").unwrap();
    assert_eq!(decision, BranchDecision::CreatedFromMainline);
    assert_eq!(path, repo.worktrees_root().join("task-0001-a"));
    assert!(path.join(".git").exists());
    assert!(repo.branch_exists(&task_branch("0001-a")));
    assert!(wm.is_healthy(&path));

    // The worktree carries the committed workspace, ticket included.
    let ws = Workspace::new(path.join("workspace"));
    assert_eq!(ws.queue_of("0001-a"), Some(Queue::Todo));
}

#[rstest]
fn create_rejects_bad_slugs(repo: TestRepo) {
    let wm = manager(&repo);
    assert!(wm.create("../escape").is_err());
    assert!(wm.create("a/b").is_err());
    assert!(wm.create("").is_err());
}

#[rstest]
fn planning_only_branch_is_reset(repo: TestRepo) {
    repo.add_todo_task("0007-reset");
    let wm = manager(&repo);

    let (path, _) = wm.create("0007-reset").unwrap();
    let task_dir = begin_task(&path, "0007-reset");
    std::fs::write(task_dir.join("plan-v1.md"), "half a plan").unwrap();
    commit_all_in(&path, "draft plan");
    wm.cleanup("0007-reset").unwrap();

    let (path, decision) = wm.create("0007-reset").unwrap();
    assert_eq!(decision, BranchDecision::ResetToMainline);
    // Back at the mainline head: the ticket is in todo again and the draft
    // is gone.
    let ws = Workspace::new(path.join("workspace"));
    assert_eq!(ws.queue_of("0007-reset"), Some(Queue::Todo));
    assert!(!ws.task_dir(Queue::InProgress, "0007-reset").exists());
}

#[rstest]
fn execution_evidence_preserves_branch(repo: TestRepo) {
    repo.add_todo_task("0008-keep");
    let wm = manager(&repo);

    let (path, _) = wm.create("0008-keep").unwrap();
    let task_dir = begin_task(&path, "0008-keep");
    std::fs::write(task_dir.join("plan.md"), "the plan").unwrap();
    let logs = task_dir.join("agent_logs");
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(logs.join("codex-exec-20260101-000000.log"), "ran").unwrap();
    commit_all_in(&path, "execution progress");
    wm.cleanup("0008-keep").unwrap();

    let (path, decision) = wm.create("0008-keep").unwrap();
    assert_eq!(decision, BranchDecision::PreservedProgress);
    let ws = Workspace::new(path.join("workspace"));
    assert_eq!(ws.queue_of("0008-keep"), Some(Queue::InProgress));
    assert!(
        ws.task_dir(Queue::InProgress, "0008-keep")
            .join("plan.md")
            .is_file()
    );
}

#[rstest]
fn create_replaces_stale_directory(repo: TestRepo) {
    repo.add_todo_task("0009-stale");
    let wm = manager(&repo);

    let (path, _) = wm.create("0009-stale").unwrap();
    // Simulate a crashed run leaving debris behind.
    std::fs::write(path.join("leftover.tmp"), "junk").unwrap();

    let (path, _) = wm.create("0009-stale").unwrap();
    assert!(wm.is_healthy(&path));
    assert!(!path.join("leftover.tmp").exists());
}

#[rstest]
fn cleanup_removes_directory_but_keeps_branch(repo: TestRepo) {
    repo.add_todo_task("0010-clean");
    let wm = manager(&repo);
    let (path, _) = wm.create("0010-clean").unwrap();

    wm.cleanup("0010-clean").unwrap();
    assert!(!path.exists());
    assert!(repo.branch_exists(&task_branch("0010-clean")));
    // Idempotent.
    wm.cleanup("0010-clean").unwrap();
}

#[rstest]
fn is_healthy_rejects_plain_directories(repo: TestRepo) {
    let wm = manager(&repo);
    let plain = repo.worktrees_root().join("task-not-a-worktree");
    std::fs::create_dir_all(&plain).unwrap();
    assert!(!wm.is_healthy(&plain));
    assert!(!wm.is_healthy(&repo.worktrees_root().join("task-missing")));
}
