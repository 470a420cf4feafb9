//! Cross-process merge serialization.
//!
//! A single file under the workspace root carries an exclusive advisory
//! lock (fs2) while an integration is in flight. The holder writes its PID
//! into the file so a successor can tell a live holder from a crashed one:
//! the advisory lock dies with the process, but the PID check lets startup
//! report and clear leftovers explicitly.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use fs2::FileExt;

pub const MERGE_LOCK_FILE: &str = ".merge.lock";

/// Held for the duration of one merge. Dropping releases the lock.
#[derive(Debug)]
pub struct MergeLock {
    file: File,
    path: PathBuf,
}

impl MergeLock {
    /// Try to take the lock without blocking. `Ok(None)` means another
    /// process (or this one) currently holds it.
    pub fn try_acquire(path: &Path) -> anyhow::Result<Option<MergeLock>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open merge lock {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                file.set_len(0)?;
                writeln!(file, "{}", std::process::id())?;
                file.flush()?;
                log::debug!("acquired merge lock {}", path.display());
                Ok(Some(MergeLock {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => {
                Err(anyhow::Error::new(e)
                    .context(format!("failed to lock {}", path.display())))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MergeLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        log::debug!("released merge lock {}", self.path.display());
    }
}

/// Remove a leftover lock file whose recorded holder is no longer alive.
///
/// Called once at startup, before any merge activity, so there is no window
/// where unlinking could race a live holder's open descriptor.
pub fn reclaim_stale(path: &Path) -> anyhow::Result<()> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Ok(());
    };
    let Some(pid) = content.lines().next().and_then(|l| l.trim().parse::<i32>().ok()) else {
        log::warn!("merge lock {} has no readable PID; removing", path.display());
        let _ = std::fs::remove_file(path);
        return Ok(());
    };
    if pid_alive(pid) {
        anyhow::bail!(
            "merge lock {} is held by live process {pid}; is another orchestrator running?",
            path.display()
        );
    }
    log::info!(
        "reclaiming stale merge lock {} (holder {pid} is dead)",
        path.display()
    );
    std::fs::remove_file(path)
        .with_context(|| format!("failed to remove stale lock {}", path.display()))
}

/// Whether a PID refers to a live process.
#[cfg(unix)]
pub fn pid_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // Signal 0 probes existence without delivering anything.
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: i32) -> bool {
    true
}
