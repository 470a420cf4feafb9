//! Merge pipeline: residue commits, finalize, conflict parking.

use rstest::rstest;

use taskherd::merge::{
    FinalizeOutcome, MergeAgentOutcome, MergePipeline, RESIDUE_COMMIT_MESSAGE,
};
use taskherd::task::{ActiveTask, Phase, TaskState};
use taskherd::workspace::{Queue, Workspace};
use taskherd::worktree::WorktreeManager;

use crate::common::{TestRepo, commit_all_in, repo};

fn setup(repo: &TestRepo, slug: &str) -> (WorktreeManager, std::path::PathBuf) {
    repo.add_todo_task(slug);
    let wm = WorktreeManager::new(repo.repo(), repo.worktrees_root(), "main".to_string());
    let (path, _) = wm.create(slug).unwrap();
    (wm, path)
}

fn merging_task(slug: &str, worktree: std::path::PathBuf) -> ActiveTask {
    ActiveTask::new(
        slug.to_string(),
        worktree,
        TaskState {
            phase: Phase::Merging,
            iteration: 3,
            rate_limited: false,
        },
    )
}

#[rstest]
fn residue_commit_covers_unclean_freeze(repo: TestRepo) {
    let (wm, path) = setup(&repo, "0002-residue");
    let cfg = repo.config();
    let git = repo.repo();
    let pipeline = MergePipeline::new(&git, &cfg, &wm);

    std::fs::write(path.join("half-done.txt"), "uncommitted agent output").unwrap();
    assert!(pipeline.commit_residue(&path).unwrap());
    assert_eq!(
        crate::common::git_in(&path, &["log", "-1", "--format=%s"]),
        RESIDUE_COMMIT_MESSAGE
    );

    // Clean tree: nothing to do.
    assert!(!pipeline.commit_residue(&path).unwrap());
}

#[rstest]
fn inspect_classifies_agent_outcomes(repo: TestRepo) {
    let (wm, path) = setup(&repo, "0003-inspect");
    let cfg = repo.config();
    let git = repo.repo();
    let pipeline = MergePipeline::new(&git, &cfg, &wm);
    let task = merging_task("0003-inspect", path.clone());

    assert_eq!(
        pipeline.inspect_agent_outcome(&task),
        MergeAgentOutcome::Incomplete
    );

    std::fs::write(task.needs_manual_rebase_path(), "").unwrap();
    assert_eq!(
        pipeline.inspect_agent_outcome(&task),
        MergeAgentOutcome::NeedsManualRebase
    );
    std::fs::remove_file(task.needs_manual_rebase_path()).unwrap();

    let ws = Workspace::new(path.join("workspace"));
    ws.move_task("0003-inspect", Queue::Todo, Queue::Done).unwrap();
    assert_eq!(
        pipeline.inspect_agent_outcome(&task),
        MergeAgentOutcome::Completed
    );
}

#[rstest]
fn finalize_lands_squash_commit_and_tears_down(repo: TestRepo) {
    let slug = "0004-land";
    let (wm, path) = setup(&repo, slug);
    let cfg = repo.config();
    let git = repo.repo();

    // Simulate the full agent lifecycle inside the worktree: admission move,
    // execution output, and the merge agent's outbound -> done move.
    let ws = Workspace::new(path.join("workspace"));
    ws.move_task(slug, Queue::Todo, Queue::InProgress).unwrap();
    commit_all_in(&path, &format!("start task {slug}"));
    std::fs::write(path.join("feature.txt"), "new behavior\n").unwrap();
    std::fs::write(ws.task_dir(Queue::InProgress, slug).join("plan.md"), "plan").unwrap();
    commit_all_in(&path, "implement feature");
    ws.move_task(slug, Queue::InProgress, Queue::Outbound).unwrap();
    commit_all_in(&path, "task complete");
    ws.move_task(slug, Queue::Outbound, Queue::Done).unwrap();
    commit_all_in(&path, "integrated");

    let pipeline = MergePipeline::new(&git, &cfg, &wm);
    let task = merging_task(slug, path.clone());
    let outcome = pipeline.finalize(&task).unwrap();
    assert_eq!(outcome, FinalizeOutcome::Merged);

    // Mainline gained exactly one squash commit with the task's changes.
    let subject = repo.head_subject();
    assert_eq!(subject, format!("complete task {slug}"));
    let body = repo.git(&["log", "-1", "--format=%b"]);
    assert!(body.contains("implement feature"), "body was: {body}");
    assert!(repo.root.join("feature.txt").is_file());
    assert_eq!(repo.workspace().queue_of(slug), Some(Queue::Done));
    assert!(
        repo.workspace()
            .task_dir(Queue::Done, slug)
            .join("plan.md")
            .is_file()
    );

    // Branch and worktree are gone.
    assert!(!repo.branch_exists(&task.branch));
    assert!(!path.exists());
}

#[rstest]
fn finalize_parks_after_exhausted_rebase_attempts(repo: TestRepo) {
    repo.commit_file("conflict.txt", "base\n", "add conflict file");
    let slug = "0005-conflict";
    let (wm, path) = setup(&repo, slug);
    let cfg = repo.config();
    let git = repo.repo();

    // Task edits the same line mainline later changes.
    std::fs::write(path.join("conflict.txt"), "from-task\n").unwrap();
    commit_all_in(&path, "task change");
    repo.commit_file("conflict.txt", "from-main\n", "mainline change");

    let pipeline = MergePipeline::new(&git, &cfg, &wm);
    let task = merging_task(slug, path.clone());
    let outcome = pipeline.finalize(&task).unwrap();
    assert_eq!(outcome, FinalizeOutcome::Parked);

    // Worktree and branch survive for the human.
    assert!(task.needs_manual_rebase_path().is_file());
    assert!(path.exists());
    assert!(repo.branch_exists(&task.branch));
    // Mainline untouched.
    assert_eq!(repo.head_subject(), "mainline change");
}
