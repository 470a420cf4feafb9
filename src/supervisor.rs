//! Subprocess supervision for agent invocations.
//!
//! Each [`AgentProcess`] owns exactly one child and one output drain. The
//! child runs under `sh -c` in the task worktree with `TERM` scrubbed so
//! agents emit non-interactive output. Merged stdout+stderr is drained
//! line-by-line to a per-invocation log file by a detached thread whose only
//! contract is "append until the pipe closes". The scheduling loop itself
//! never reads from the pipe, it only polls exit status.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::Context;
use wait_timeout::ChildExt;

/// Which signal `signal_group` delivers.
#[derive(Debug, Clone, Copy)]
enum SignalKind {
    Term,
    Kill,
}

/// Watch-file mode: terminate the child once `path` exists with at least
/// `min_size` bytes. Used for plan-writing invocations where agents tend to
/// idle after producing the artifact.
#[derive(Debug, Clone)]
pub struct WatchFile {
    pub path: PathBuf,
    pub min_size: u64,
}

impl WatchFile {
    fn satisfied(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() >= self.min_size)
            .unwrap_or(false)
    }
}

/// One supervised agent invocation.
pub struct AgentProcess {
    child: Child,
    command: String,
    log_path: PathBuf,
    watch: Option<WatchFile>,
    started: Instant,
}

impl AgentProcess {
    /// Launch `command_line` via `sh -c` with `dir` as working directory.
    ///
    /// stdout and stderr are merged inside the shell (`{ …; } 2>&1`) so a
    /// single drain thread sees both streams in order.
    pub fn spawn(
        command_line: &str,
        dir: &Path,
        log_path: &Path,
        watch: Option<WatchFile>,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log dir {}", parent.display()))?;
        }
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;

        log::debug!("$ sh -c {command_line:?} [{}]", dir.display());
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("{{ {command_line}; }} 2>&1"))
            .current_dir(dir)
            .env_remove("TERM")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        // Agents fork freely (the shell itself is already a wrapper); a
        // dedicated process group lets terminate() reach the whole tree.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn agent: {command_line}"))?;

        let stdout = child
            .stdout
            .take()
            .expect("stdout was configured as piped");
        let mut file = log_file;
        // Fire-and-forget: the thread exits when the child closes its pipe,
        // including after a kill. Nothing joins it.
        std::thread::Builder::new()
            .name("agent-drain".to_string())
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    match line {
                        Ok(line) => {
                            if writeln!(file, "{line}").is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                let _ = file.flush();
            })
            .context("failed to spawn drain thread")?;

        Ok(Self {
            child,
            command: command_line.to_string(),
            log_path: log_path.to_path_buf(),
            watch,
            started: Instant::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Time since launch, for the audit trail.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Poll for completion. `None` = still running, `Some(code)` = exited
    /// (-1 when killed by a signal).
    ///
    /// When watch-file mode fires, the idling child is terminated and the
    /// invocation reported as complete; the artifact, not the exit status,
    /// is what downstream state transitions key on.
    pub fn poll(&mut self) -> anyhow::Result<Option<i32>> {
        if let Some(status) = self.child.try_wait().context("failed to poll agent")? {
            return Ok(Some(status.code().unwrap_or(-1)));
        }
        let fired = self
            .watch
            .as_ref()
            .filter(|watch| watch.satisfied())
            .map(|watch| watch.path.clone());
        if let Some(path) = fired {
            log::debug!(
                "watch file {} reached threshold; reaping idle agent pid {}",
                path.display(),
                self.pid()
            );
            self.terminate(Duration::from_secs(5))?;
            return Ok(Some(0));
        }
        Ok(None)
    }

    /// Cooperative-then-forced termination. Idempotent; safe on a dead child.
    pub fn terminate(&mut self, grace: Duration) -> anyhow::Result<Option<i32>> {
        if let Some(status) = self.child.try_wait().context("failed to poll agent")? {
            return Ok(status.code());
        }

        self.signal_group(SignalKind::Term);

        match self.child.wait_timeout(grace).context("failed to wait for agent")? {
            Some(status) => Ok(status.code()),
            None => {
                log::warn!(
                    "agent pid {} ignored SIGTERM for {:?}; killing",
                    self.pid(),
                    grace
                );
                self.signal_group(SignalKind::Kill);
                self.child.kill().context("failed to kill agent")?;
                let status = self.child.wait().context("failed to reap agent")?;
                Ok(status.code())
            }
        }
    }

    /// Signal the child's process group (falls back to the child alone on
    /// non-Unix targets via `Child::kill`).
    #[cfg(unix)]
    fn signal_group(&self, kind: SignalKind) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let signal = match kind {
            SignalKind::Term => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
        };
        let _ = kill(Pid::from_raw(-(self.child.id() as i32)), signal);
    }

    #[cfg(not(unix))]
    fn signal_group(&self, _kind: SignalKind) {}
}
