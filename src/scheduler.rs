//! The periodic scheduling loop.
//!
//! A single control thread advances every active task once per tick: reap
//! finished agents, promote tasks whose outbound sentinel appeared, drive
//! the merge queue, advance planning state machines, admit new work up to
//! the concurrency ceiling, restart crashed executors, and finish merges.
//! The loop never waits on an agent: it polls exit status and file
//! existence, then sleeps.
//!
//! Per-task failures are logged and skipped; nothing a single task does may
//! abort the loop.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::agents::{
    AgentRegistry, Role, executor_prompt, log_file_name, log_timestamp, merger_prompt,
    planner_prompt, reviewer_prompt,
};
use crate::audit::AuditLog;
use crate::config::Config;
use crate::git::Repository;
use crate::merge::{FinalizeOutcome, MergeAgentOutcome, MergePipeline};
use crate::mergelock::{MERGE_LOCK_FILE, MergeLock, reclaim_stale};
use crate::ratelimit::check_rate_limited;
use crate::supervisor::{AgentProcess, WatchFile};
use crate::task::{
    ActiveTask, Phase, PlanningStep, TaskState, final_plan_path, next_planning_step,
    plan_version_path, planning_iteration,
};
use crate::workspace::{Queue, TaskStore, Workspace};
use crate::worktree::WorktreeManager;

/// Central state for one orchestrator process. Passed explicitly to every
/// scheduling step; there is no process-global singleton.
pub struct TaskManager {
    repo: Repository,
    cfg: Config,
    store: TaskStore,
    worktrees: WorktreeManager,
    registry: AgentRegistry,
    audit: AuditLog,
    active: Vec<ActiveTask>,
    /// FIFO by the moment a task reached OUTBOUND.
    merge_queue: VecDeque<String>,
    /// Held while a merge is in flight; serializes merges across processes.
    merge_lock: Option<MergeLock>,
    /// Slugs parked behind `.needs-manual-rebase`; excluded from admission.
    parked: HashSet<String>,
}

impl TaskManager {
    pub fn new(repo: Repository, cfg: Config, selectors: Vec<String>) -> anyhow::Result<Self> {
        let mainline_ws = Workspace::new(cfg.workspace_in(repo.root()));
        mainline_ws.ensure_layout()?;
        reclaim_stale(&mainline_ws.root().join(MERGE_LOCK_FILE))?;
        write_repo_excludes(&repo, &cfg)?;

        let worktrees = WorktreeManager::new(
            repo.clone(),
            cfg.worktrees_root_in(repo.root()),
            cfg.mainline.clone(),
        );
        let registry = AgentRegistry::new(cfg.agents.clone());
        let audit = AuditLog::new(&mainline_ws.logs_dir());
        let store = TaskStore::new(mainline_ws, selectors);

        Ok(Self {
            repo,
            cfg,
            store,
            worktrees,
            registry,
            audit,
            active: Vec::new(),
            merge_queue: VecDeque::new(),
            merge_lock: None,
            parked: HashSet::new(),
        })
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_slugs(&self) -> Vec<String> {
        self.active.iter().map(|t| t.slug.clone()).collect()
    }

    pub fn task_phase(&self, slug: &str) -> Option<Phase> {
        self.active.iter().find(|t| t.slug == slug).map(|t| t.phase)
    }

    pub fn merge_queue_len(&self) -> usize {
        self.merge_queue.len()
    }

    pub fn is_parked(&self, slug: &str) -> bool {
        self.parked.contains(slug)
    }

    /// Re-adopt worktrees left by a previous run. Phase is derived from the
    /// queue directory first; `.task-state` supplies the rate-limit flag and
    /// breaks the in-progress tie between planning and executing.
    pub fn recover(&mut self) -> anyhow::Result<()> {
        let root = self.cfg.worktrees_root_in(self.repo.root());
        if !root.is_dir() {
            return Ok(());
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&root)
            .with_context(|| format!("failed to read {}", root.display()))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();

        for path in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(slug) = name.strip_prefix("task-").map(str::to_string) else {
                continue;
            };
            if crate::merge::is_parked(&path) {
                log::warn!("task {slug}: parked for manual rebase; not adopting");
                self.parked.insert(slug);
                continue;
            }
            if !self.worktrees.is_healthy(&path) {
                log::warn!(
                    "worktree {} is unhealthy; leaving it for re-admission",
                    path.display()
                );
                continue;
            }
            if self.active.len() >= self.cfg.max_concurrent {
                log::warn!("task {slug}: concurrency ceiling reached; not adopting");
                continue;
            }
            match adopt_worktree(&self.repo, &self.cfg, slug.clone(), path) {
                Ok(task) => {
                    log::info!("task {}: recovered in phase {}", task.slug, task.phase);
                    if matches!(task.phase, Phase::Outbound | Phase::Merging) {
                        self.merge_queue.push_back(task.slug.clone());
                    }
                    self.active.push(task);
                }
                Err(e) => log::error!("task {slug}: recovery failed: {e:#}"),
            }
        }
        Ok(())
    }

    /// Run until the shutdown flag is raised, then terminate every child
    /// and release the lock.
    pub fn run(&mut self, shutdown: &AtomicBool) -> anyhow::Result<()> {
        log::info!(
            "orchestrating up to {} tasks on mainline {:?}",
            self.cfg.max_concurrent,
            self.cfg.mainline
        );
        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.tick() {
                log::error!("tick failed: {e:#}");
            }
            let deadline = Instant::now() + self.cfg.tick_interval();
            while Instant::now() < deadline && !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
        self.shutdown();
        Ok(())
    }

    /// One scheduling pass. Step order matters: completions are observed
    /// before the merge queue moves, and new work is admitted only after
    /// existing tasks had their chance to advance.
    pub fn tick(&mut self) -> anyhow::Result<()> {
        self.reap_agents();
        self.check_completed_tasks();
        self.process_merge_queue();
        self.advance_planning_tasks();
        self.start_new_tasks();
        self.handle_execution_tasks();
        self.handle_merging_tasks();
        self.housekeeping();
        self.print_status();
        Ok(())
    }

    /// Terminate all children (soft, then hard) and drop the merge lock.
    /// Task state is already on disk; nothing else to persist.
    pub fn shutdown(&mut self) {
        let running = self
            .active
            .iter_mut()
            .filter(|t| t.agent.is_some())
            .count();
        if running > 0 {
            log::info!("shutting down: terminating {running} running agents");
        }
        for task in &mut self.active {
            if let Some(agent) = task.agent.as_mut() {
                if let Err(e) = agent.terminate(self.cfg.kill_grace()) {
                    log::error!("task {}: failed to terminate agent: {e:#}", task.slug);
                }
            }
            task.agent = None;
        }
        self.merge_lock = None;
        log::info!("shutdown complete");
    }

    // =========================================================================
    // Tick steps
    // =========================================================================

    /// Poll every owned child once; record exits in the audit trail.
    fn reap_agents(&mut self) {
        let audit = &mut self.audit;
        for task in &mut self.active {
            let Some(agent) = task.agent.as_mut() else {
                continue;
            };
            match agent.poll() {
                Ok(None) => {}
                Ok(Some(code)) => {
                    let duration = agent.elapsed();
                    if let (Some(role), Some(backend)) = (task.agent_role, task.agent_backend) {
                        audit.record(&task.slug, role, backend, Some(code), duration);
                    }
                    log::debug!("task {}: agent exited with code {code}", task.slug);
                    task.agent = None;
                    task.agent_role = None;
                    task.agent_backend = None;
                    task.last_exit = Some(code);
                }
                Err(e) => {
                    log::error!("task {}: poll failed: {e:#}", task.slug);
                    task.agent = None;
                    task.agent_role = None;
                    task.agent_backend = None;
                    task.last_exit = Some(-1);
                }
            }
        }
    }

    /// Any planning/executing task whose outbound ticket appeared is queued
    /// for merge and marked OUTBOUND.
    fn check_completed_tasks(&mut self) {
        let cfg = &self.cfg;
        for task in &mut self.active {
            if !matches!(task.phase, Phase::Planning | Phase::Executing) {
                continue;
            }
            let ws = Workspace::new(cfg.workspace_in(&task.worktree));
            if !ws.ticket_path(Queue::Outbound, &task.slug).is_file() {
                continue;
            }
            if let Err(e) = task.set_phase(Phase::Outbound) {
                log::error!("task {}: failed to persist phase: {e:#}", task.slug);
                continue;
            }
            if !self.merge_queue.contains(&task.slug) {
                self.merge_queue.push_back(task.slug.clone());
            }
        }
    }

    /// Start or advance the merge for the queue head: freeze the worktree,
    /// take the lock, launch the merge agent. No-op while a merge runs.
    fn process_merge_queue(&mut self) {
        if self.active.iter().any(|t| t.phase == Phase::Merging) {
            return;
        }
        let Some(slug) = self.merge_queue.front().cloned() else {
            return;
        };
        let Some(idx) = self
            .active
            .iter()
            .position(|t| t.slug == slug && t.phase == Phase::Outbound)
        else {
            // Head task is gone (parked or dropped); let the queue advance.
            self.merge_queue.pop_front();
            return;
        };

        let cfg = &self.cfg;
        let repo = &self.repo;
        let worktrees = &self.worktrees;
        let registry = &self.registry;
        let task = &mut self.active[idx];

        // Freeze protocol: ask nicely, then escalate after the timeout.
        if task.agent.is_some() {
            match task.freeze_requested_at {
                None => {
                    if let Err(e) = std::fs::write(task.merge_requested_path(), "") {
                        log::error!("task {slug}: failed to write merge request: {e}");
                        return;
                    }
                    task.freeze_requested_at = Some(Instant::now());
                    log::info!("task {slug}: merge requested; waiting for agent to finish");
                    return;
                }
                Some(at) if at.elapsed() < cfg.freeze_timeout() => return,
                Some(_) => {
                    log::warn!("task {slug}: freeze timeout; terminating agent");
                    if let Some(agent) = task.agent.as_mut() {
                        if let Err(e) = agent.terminate(cfg.kill_grace()) {
                            log::error!("task {slug}: terminate failed: {e:#}");
                        }
                    }
                    task.agent = None;
                    task.agent_role = None;
                    task.agent_backend = None;
                }
            }
        }
        task.freeze_requested_at = None;
        let _ = std::fs::remove_file(task.merge_requested_path());

        let pipeline = MergePipeline::new(repo, cfg, worktrees);
        match pipeline.commit_residue(&task.worktree) {
            Ok(true) => log::info!("task {slug}: committed residual changes before merge"),
            Ok(false) => {}
            Err(e) => {
                log::error!("task {slug}: residue commit failed: {e:#}");
                return;
            }
        }

        let lock_path = cfg.workspace_in(repo.root()).join(MERGE_LOCK_FILE);
        let lock = match MergeLock::try_acquire(&lock_path) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                log::debug!("merge lock busy; task {slug} stays at queue head");
                return;
            }
            Err(e) => {
                log::error!("task {slug}: lock acquisition failed: {e:#}");
                return;
            }
        };

        if let Err(e) = task.set_phase(Phase::Merging) {
            log::error!("task {slug}: failed to persist phase: {e:#}");
            return;
        }
        if let Err(e) = launch_merge_agent(cfg, registry, task) {
            log::error!("task {slug}: failed to start merge agent: {e:#}");
            let _ = task.set_phase(Phase::Outbound);
            return;
        }
        self.merge_lock = Some(lock);
    }

    /// Drive the planning sub-state machine for every idle planning task.
    fn advance_planning_tasks(&mut self) {
        let cfg = &self.cfg;
        let repo = &self.repo;
        let registry = &self.registry;
        for task in &mut self.active {
            if task.phase != Phase::Planning || task.agent.is_some() {
                continue;
            }
            if let Err(e) = advance_planning(cfg, repo, registry, task) {
                log::error!("task {}: planning step failed: {e:#}", task.slug);
            }
        }
    }

    /// Admit todo tasks while below the concurrency ceiling.
    fn start_new_tasks(&mut self) {
        while self.active.len() < self.cfg.max_concurrent {
            let mut excluded: HashSet<String> =
                self.active.iter().map(|t| t.slug.clone()).collect();
            excluded.extend(self.parked.iter().cloned());

            let slug = match self.store.pick_next(move |s| excluded.contains(s)) {
                Ok(Some(slug)) => slug,
                Ok(None) => break,
                Err(e) => {
                    log::error!("failed to scan todo queue: {e:#}");
                    break;
                }
            };
            if let Err(e) = self.admit(&slug) {
                log::error!("task {slug}: admission failed: {e:#}");
                break;
            }
        }
    }

    fn admit(&mut self, slug: &str) -> anyhow::Result<()> {
        let (path, decision) = self.worktrees.create(slug)?;
        log::debug!("task {slug}: branch decision {decision:?}");
        let task = adopt_worktree(&self.repo, &self.cfg, slug.to_string(), path)?;
        log::info!("task {}: admitted in phase {}", task.slug, task.phase);
        if matches!(task.phase, Phase::Outbound) && !self.merge_queue.contains(&task.slug) {
            self.merge_queue.push_back(task.slug.clone());
        }
        self.active.push(task);
        Ok(())
    }

    /// Restart policy for executing tasks whose agent is not running.
    fn handle_execution_tasks(&mut self) {
        let cfg = &self.cfg;
        let registry = &self.registry;
        for task in &mut self.active {
            if task.phase != Phase::Executing || task.agent.is_some() {
                continue;
            }
            let ws = Workspace::new(cfg.workspace_in(&task.worktree));
            if ws.ticket_path(Queue::Outbound, &task.slug).is_file() {
                // Sentinel present; check_completed_tasks picks it up next tick.
                continue;
            }

            if let Some(code) = task.last_exit {
                let logs = agent_logs_dir(cfg, task);
                if code != 0 && !task.rate_limited && check_rate_limited(&logs) {
                    if let Err(e) = task.mark_rate_limited() {
                        log::error!("task {}: failed to persist flag: {e:#}", task.slug);
                        continue;
                    }
                } else if code == 0 {
                    log::warn!(
                        "task {}: executor exited cleanly without reaching outbound; restarting",
                        task.slug
                    );
                } else {
                    log::warn!(
                        "task {}: executor exited with code {code}; restarting",
                        task.slug
                    );
                }
            }

            if let Err(e) = launch_executor(cfg, registry, task) {
                log::error!("task {}: failed to start executor: {e:#}", task.slug);
            }
        }
    }

    /// Poll the merge agent; on exit, classify and finalize / park / retry.
    fn handle_merging_tasks(&mut self) {
        let Some(idx) = self.active.iter().position(|t| t.phase == Phase::Merging) else {
            return;
        };
        if self.active[idx].agent.is_some() {
            return;
        }

        enum Action {
            Drop,
            Park,
            Requeue,
            Relaunch,
        }

        let action = {
            let cfg = &self.cfg;
            let repo = &self.repo;
            let worktrees = &self.worktrees;
            let registry = &self.registry;
            let task = &mut self.active[idx];
            let pipeline = MergePipeline::new(repo, cfg, worktrees);
            match pipeline.inspect_agent_outcome(task) {
                MergeAgentOutcome::Completed => match pipeline.finalize(task) {
                    Ok(FinalizeOutcome::Merged) => Action::Drop,
                    Ok(FinalizeOutcome::Parked) => Action::Park,
                    Ok(FinalizeOutcome::Requeue) => Action::Requeue,
                    Err(e) => {
                        log::error!("task {}: finalize failed: {e:#}", task.slug);
                        Action::Requeue
                    }
                },
                MergeAgentOutcome::NeedsManualRebase => {
                    log::error!(
                        "task {}: merge agent gave up; parked for manual rebase",
                        task.slug
                    );
                    Action::Park
                }
                MergeAgentOutcome::Incomplete => {
                    log::warn!("task {}: merge agent exited inconclusively; retrying", task.slug);
                    match launch_merge_agent(cfg, registry, task) {
                        Ok(()) => Action::Relaunch,
                        Err(e) => {
                            log::error!("task {}: failed to restart merge agent: {e:#}", task.slug);
                            Action::Requeue
                        }
                    }
                }
            }
        };

        match action {
            Action::Relaunch => {}
            Action::Drop => {
                let task = self.active.remove(idx);
                self.merge_queue.retain(|s| s != &task.slug);
                self.merge_lock = None;
            }
            Action::Park => {
                let task = self.active.remove(idx);
                self.merge_queue.retain(|s| s != &task.slug);
                self.parked.insert(task.slug);
                self.merge_lock = None;
            }
            Action::Requeue => {
                let task = &mut self.active[idx];
                if let Err(e) = task.set_phase(Phase::Outbound) {
                    log::error!("task {}: failed to persist phase: {e:#}", task.slug);
                }
                self.merge_lock = None;
            }
        }
    }

    /// Commit stray workspace changes on mainline. Runs only when nothing is
    /// merging, and takes the merge lock non-blocking so it can never race
    /// another process's integration.
    fn housekeeping(&mut self) {
        if self.active.iter().any(|t| t.phase == Phase::Merging) {
            return;
        }
        let repo = &self.repo;
        let cfg = &self.cfg;
        let result: anyhow::Result<()> = (|| {
            if repo.current_branch_in(repo.root())? != cfg.mainline {
                return Ok(());
            }
            if !repo.is_dirty_path_in(repo.root(), &cfg.workspace_dir)? {
                return Ok(());
            }
            let lock_path = cfg.workspace_in(repo.root()).join(MERGE_LOCK_FILE);
            let Some(_lock) = MergeLock::try_acquire(&lock_path)? else {
                return Ok(());
            };
            repo.add_path_in(repo.root(), &cfg.workspace_dir)?;
            repo.commit_in(repo.root(), "housekeeping: sync workspace state")?;
            log::info!("housekeeping commit on {}", cfg.mainline);
            Ok(())
        })();
        if let Err(e) = result {
            log::error!("housekeeping failed: {e:#}");
        }
    }

    /// One status line per tick.
    fn print_status(&self) {
        if self.active.is_empty() && self.merge_queue.is_empty() {
            log::info!("Idle");
            return;
        }
        let mut parts = Vec::with_capacity(self.active.len());
        for task in &self.active {
            let liveness = if task.agent.is_some() { "running" } else { "idle" };
            let detail = match task.phase {
                Phase::Planning => format!("{}(i{})", task.phase, task.iteration),
                _ => task.phase.to_string(),
            };
            parts.push(format!("{} {detail} agent:{liveness}", task.slug));
        }
        log::info!(
            "{} active, {} queued for merge | {}",
            self.active.len(),
            self.merge_queue.len(),
            parts.join(" | ")
        );
    }
}

// ===========================================================================
// Per-task helpers (free functions so field borrows stay disjoint)
// ===========================================================================

/// Keep orchestration files out of every checkout's `git add -A`. The
/// info/exclude file is shared across all linked worktrees, so one write at
/// startup covers the mainline and every task worktree alike.
fn write_repo_excludes(repo: &Repository, cfg: &Config) -> anyhow::Result<()> {
    let exclude = repo.exclude_file_in(repo.root())?;
    if let Some(parent) = exclude.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock_entry = format!("/{}/{}", cfg.workspace_dir, MERGE_LOCK_FILE);
    let entries = [
        "/.task-state",
        "/.merge-requested",
        "/.needs-manual-rebase",
        lock_entry.as_str(),
    ];
    let mut content = std::fs::read_to_string(&exclude).unwrap_or_default();
    for entry in entries {
        if !content.lines().any(|l| l == entry) {
            content.push_str(entry);
            content.push('\n');
        }
    }
    std::fs::write(&exclude, content)
        .with_context(|| format!("failed to write {}", exclude.display()))
}

/// Build an ActiveTask from an existing worktree's on-disk state.
///
/// Queue location decides the phase; the persisted state file fills in what
/// the queue cannot express. A ticket still in todo is moved to in-progress
/// and committed; that is the admission transition.
fn adopt_worktree(
    repo: &Repository,
    cfg: &Config,
    slug: String,
    worktree: PathBuf,
) -> anyhow::Result<ActiveTask> {
    let ws = Workspace::new(cfg.workspace_in(&worktree));
    let saved = TaskState::load(&worktree);

    let queue = match ws.queue_of(&slug) {
        Some(q) => q,
        None => anyhow::bail!(
            "ticket for {slug} not found in any queue under {}",
            ws.root().display()
        ),
    };

    let phase = match queue {
        Queue::Todo => {
            ws.move_task(&slug, Queue::Todo, Queue::InProgress)?;
            repo.add_all_in(&worktree)?;
            repo.commit_in(&worktree, &format!("start task {slug}"))?;
            Phase::Planning
        }
        Queue::InProgress => {
            let task_dir = ws.task_dir(Queue::InProgress, &slug);
            if final_plan_path(&task_dir).is_file() {
                Phase::Executing
            } else {
                Phase::Planning
            }
        }
        Queue::Outbound => Phase::Outbound,
        // Merge agent finished but finalize never ran; the merge pipeline
        // re-inspects and completes it.
        Queue::Done => Phase::Outbound,
    };

    let task_dir = ws.task_dir(
        if queue == Queue::Todo { Queue::InProgress } else { queue },
        &slug,
    );
    let state = TaskState {
        phase,
        iteration: planning_iteration(&task_dir),
        rate_limited: saved.map(|s| s.rate_limited).unwrap_or(false),
    };
    state.save(&worktree)?;
    Ok(ActiveTask::new(slug, worktree, state))
}

/// The queue currently holding the task inside its own worktree.
fn current_queue(cfg: &Config, task: &ActiveTask) -> Queue {
    let ws = Workspace::new(cfg.workspace_in(&task.worktree));
    ws.queue_of(&task.slug).unwrap_or(Queue::InProgress)
}

/// Task directory path relative to the worktree root, for agent prompts.
fn task_rel_dir(cfg: &Config, queue: Queue, slug: &str) -> PathBuf {
    Path::new(&cfg.workspace_dir)
        .join("tasks")
        .join(queue.dir_name())
        .join(slug)
}

fn agent_logs_dir(cfg: &Config, task: &ActiveTask) -> PathBuf {
    let ws = Workspace::new(cfg.workspace_in(&task.worktree));
    ws.task_dir(current_queue(cfg, task), &task.slug)
        .join("agent_logs")
}

/// Spawn an agent for `task` and take ownership of the child.
fn launch_agent(
    cfg: &Config,
    registry: &AgentRegistry,
    task: &mut ActiveTask,
    role: Role,
    detail: &str,
    prompt: &str,
    watch: Option<WatchFile>,
) -> anyhow::Result<()> {
    let backend = registry.backend_for(role, task.rate_limited);
    let command = registry.command_line(backend, prompt);
    let log_path = agent_logs_dir(cfg, task).join(log_file_name(backend, role, detail));
    let agent = AgentProcess::spawn(&command, &task.worktree, &log_path, watch)?;
    log::info!(
        "task {}: started {role} on {backend} (pid {})",
        task.slug,
        agent.pid()
    );
    task.agent = Some(agent);
    task.agent_role = Some(role);
    task.agent_backend = Some(backend);
    task.last_exit = None;
    Ok(())
}

/// Evaluate the planning table for one idle task and act on it.
fn advance_planning(
    cfg: &Config,
    repo: &Repository,
    registry: &AgentRegistry,
    task: &mut ActiveTask,
) -> anyhow::Result<()> {
    // A reviewer that hit its quota leaves the marker in its log; the flag
    // must flip before the backend for the next launch is chosen.
    if !task.rate_limited && check_rate_limited(&agent_logs_dir(cfg, task)) {
        task.mark_rate_limited()?;
    }

    let ws = Workspace::new(cfg.workspace_in(&task.worktree));
    let task_dir = ws.task_dir(Queue::InProgress, &task.slug);
    let rel_dir = task_rel_dir(cfg, Queue::InProgress, &task.slug);

    match next_planning_step(&task_dir) {
        PlanningStep::StartPlanner { version } => {
            let prompt = planner_prompt(&rel_dir, version);
            let watch = WatchFile {
                path: plan_version_path(&task_dir, version),
                min_size: cfg.plan_watch_min_bytes,
            };
            launch_agent(
                cfg,
                registry,
                task,
                Role::Planner,
                &version.to_string(),
                &prompt,
                Some(watch),
            )?;
            task.set_iteration(version)?;
        }
        PlanningStep::StartReviewer { version } => {
            let prompt = reviewer_prompt(&rel_dir, version);
            let watch = WatchFile {
                path: crate::task::feedback_path(&task_dir, version),
                min_size: cfg.plan_watch_min_bytes,
            };
            launch_agent(
                cfg,
                registry,
                task,
                Role::Reviewer,
                &version.to_string(),
                &prompt,
                Some(watch),
            )?;
        }
        PlanningStep::Finalize => {
            std::fs::copy(plan_version_path(&task_dir, 3), final_plan_path(&task_dir))
                .context("failed to promote plan-v3.md to plan.md")?;
            repo.add_all_in(&task.worktree)?;
            repo.commit_in(&task.worktree, &format!("finalize plan for {}", task.slug))?;
            task.last_exit = None;
            task.set_phase(Phase::Executing)?;
        }
        PlanningStep::Complete => {
            task.last_exit = None;
            task.set_phase(Phase::Executing)?;
        }
    }
    Ok(())
}

fn launch_executor(
    cfg: &Config,
    registry: &AgentRegistry,
    task: &mut ActiveTask,
) -> anyhow::Result<()> {
    let in_progress = task_rel_dir(cfg, Queue::InProgress, &task.slug);
    let outbound = task_rel_dir(cfg, Queue::Outbound, &task.slug);
    let prompt = executor_prompt(&in_progress, &outbound);
    launch_agent(
        cfg,
        registry,
        task,
        Role::Executor,
        &log_timestamp(),
        &prompt,
        None,
    )
}

fn launch_merge_agent(
    cfg: &Config,
    registry: &AgentRegistry,
    task: &mut ActiveTask,
) -> anyhow::Result<()> {
    let outbound = task_rel_dir(cfg, Queue::Outbound, &task.slug);
    let done = task_rel_dir(cfg, Queue::Done, &task.slug);
    let prompt = merger_prompt(&outbound, &done, &cfg.mainline);
    launch_agent(
        cfg,
        registry,
        task,
        Role::Merger,
        &log_timestamp(),
        &prompt,
        None,
    )
}

/// Read-only queue summary for `herd status`.
pub fn queue_summary(cfg: &Config, repo_root: &Path) -> anyhow::Result<Vec<(Queue, Vec<String>)>> {
    let ws = Workspace::new(cfg.workspace_in(repo_root));
    let mut summary = Vec::new();
    for queue in Queue::all() {
        summary.push((queue, ws.list_queue(queue)?));
    }
    Ok(summary)
}
