//! Crash recovery: re-adopting worktrees from a previous run.

use rstest::rstest;

use taskherd::scheduler::TaskManager;
use taskherd::task::{NEEDS_MANUAL_REBASE_FILE, Phase, TaskState};
use taskherd::workspace::{Queue, Workspace};
use taskherd::worktree::WorktreeManager;

use crate::common::{TestRepo, commit_all_in, repo};

/// Build the on-disk remains of a run that died mid-planning: worktree with
/// the ticket in in-progress, two plan drafts, and a persisted state file.
fn crashed_planning_task(repo: &TestRepo, slug: &str) -> std::path::PathBuf {
    repo.add_todo_task(slug);
    let wm = WorktreeManager::new(repo.repo(), repo.worktrees_root(), "main".to_string());
    let (path, _) = wm.create(slug).unwrap();

    let ws = Workspace::new(path.join("workspace"));
    ws.move_task(slug, Queue::Todo, Queue::InProgress).unwrap();
    commit_all_in(&path, &format!("start task {slug}"));
    let task_dir = ws.task_dir(Queue::InProgress, slug);
    std::fs::write(task_dir.join("plan-v1.md"), "draft one").unwrap();
    std::fs::write(task_dir.join("feedback-1.md"), "feedback one").unwrap();
    std::fs::write(task_dir.join("plan-v2.md"), "draft two").unwrap();
    commit_all_in(&path, "planning progress");
    TaskState {
        phase: Phase::Planning,
        iteration: 2,
        rate_limited: false,
    }
    .save(&path)
    .unwrap();
    path
}

#[rstest]
fn recover_resumes_planning_in_place(repo: TestRepo) {
    let slug = "0042-resume";
    let path = crashed_planning_task(&repo, slug);

    let mut cfg = repo.config();
    // Long-running stub so the launched reviewer stays observable.
    cfg.agents.claude = "sleep 30; true {prompt}".to_string();
    cfg.agents.codex = "sleep 30; true {prompt}".to_string();

    let mut manager = TaskManager::new(repo.repo(), cfg, Vec::new()).unwrap();
    manager.recover().unwrap();

    assert_eq!(manager.active_slugs(), vec![slug.to_string()]);
    assert_eq!(manager.task_phase(slug), Some(Phase::Planning));
    // Same worktree, not a second one.
    let worktrees: Vec<_> = std::fs::read_dir(repo.worktrees_root())
        .unwrap()
        .flatten()
        .collect();
    assert_eq!(worktrees.len(), 1);
    assert_eq!(worktrees[0].path(), path);
    // Iteration was rebuilt from the artifacts (two drafts on disk).
    let state = TaskState::load(&path).unwrap();
    assert_eq!(state.iteration, 2);

    // One tick resumes exactly where planning stopped: feedback-2 is the
    // next missing artifact, and the reviewer runs on codex.
    manager.tick().unwrap();
    let ws = Workspace::new(path.join("workspace"));
    let logs = ws.task_dir(Queue::InProgress, slug).join("agent_logs");
    assert!(logs.join("codex-review-2.log").exists());

    manager.shutdown();
}

#[rstest]
fn recover_derives_executing_from_final_plan(repo: TestRepo) {
    let slug = "0043-exec";
    let path = crashed_planning_task(&repo, slug);
    let ws = Workspace::new(path.join("workspace"));
    let task_dir = ws.task_dir(Queue::InProgress, slug);
    std::fs::write(task_dir.join("feedback-2.md"), "feedback two").unwrap();
    std::fs::write(task_dir.join("plan-v3.md"), "draft three").unwrap();
    std::fs::write(task_dir.join("feedback-3.md"), "feedback three").unwrap();
    std::fs::write(task_dir.join("plan.md"), "final plan").unwrap();
    commit_all_in(&path, "finalize plan");
    // Stale state file claims planning; the queue + plan.md win.
    TaskState {
        phase: Phase::Planning,
        iteration: 3,
        rate_limited: true,
    }
    .save(&path)
    .unwrap();

    let mut cfg = repo.config();
    cfg.agents.claude = "sleep 30; true {prompt}".to_string();
    cfg.agents.codex = "sleep 30; true {prompt}".to_string();
    let mut manager = TaskManager::new(repo.repo(), cfg, Vec::new()).unwrap();
    manager.recover().unwrap();

    assert_eq!(manager.task_phase(slug), Some(Phase::Executing));
    // The sticky rate-limit flag survives recovery.
    let state = TaskState::load(&path).unwrap();
    assert!(state.rate_limited);
    manager.shutdown();
}

#[rstest]
fn recover_skips_parked_worktrees(repo: TestRepo) {
    let slug = "0044-parked";
    let path = crashed_planning_task(&repo, slug);
    std::fs::write(path.join(NEEDS_MANUAL_REBASE_FILE), "").unwrap();

    let mut manager = TaskManager::new(repo.repo(), repo.config(), Vec::new()).unwrap();
    manager.recover().unwrap();

    assert_eq!(manager.active_count(), 0);
    assert!(manager.is_parked(slug));
    // Parked worktrees are left alone for the human.
    assert!(path.exists());
}

#[rstest]
fn recover_queues_outbound_tasks_for_merge(repo: TestRepo) {
    let slug = "0045-outbound";
    let path = crashed_planning_task(&repo, slug);
    let ws = Workspace::new(path.join("workspace"));
    ws.move_task(slug, Queue::InProgress, Queue::Outbound).unwrap();
    commit_all_in(&path, "task complete");

    let mut manager = TaskManager::new(repo.repo(), repo.config(), Vec::new()).unwrap();
    manager.recover().unwrap();

    assert_eq!(manager.task_phase(slug), Some(Phase::Outbound));
    assert_eq!(manager.merge_queue_len(), 1);
    manager.shutdown();
}
