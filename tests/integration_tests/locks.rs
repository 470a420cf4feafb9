//! Merge-lock behavior across orchestrator startups.

use rstest::rstest;

use taskherd::mergelock::{MERGE_LOCK_FILE, MergeLock};
use taskherd::scheduler::TaskManager;

use crate::common::{TestRepo, repo};

#[rstest]
fn stale_lock_is_reclaimed_on_startup(repo: TestRepo) {
    let workspace = repo.root.join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    let lock_path = workspace.join(MERGE_LOCK_FILE);
    // A PID far beyond any default pid_max: guaranteed dead.
    std::fs::write(&lock_path, "999999999\n").unwrap();

    let manager = TaskManager::new(repo.repo(), repo.config(), Vec::new()).unwrap();
    assert!(!lock_path.exists(), "stale lock must be removed");
    drop(manager);
}

#[rstest]
fn live_lock_aborts_startup(repo: TestRepo) {
    let workspace = repo.root.join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    let lock_path = workspace.join(MERGE_LOCK_FILE);
    std::fs::write(&lock_path, format!("{}\n", std::process::id())).unwrap();

    let result = TaskManager::new(repo.repo(), repo.config(), Vec::new());
    assert!(result.is_err(), "live holder must block startup");
    assert!(lock_path.exists());
}

#[rstest]
fn lock_file_serializes_within_a_process(repo: TestRepo) {
    let lock_path = repo.root.join("workspace").join(MERGE_LOCK_FILE);
    std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();

    let held = MergeLock::try_acquire(&lock_path).unwrap().expect("acquire");
    // A second open file description contends with the first.
    assert!(MergeLock::try_acquire(&lock_path).unwrap().is_none());
    drop(held);
    assert!(MergeLock::try_acquire(&lock_path).unwrap().is_some());
}
