//! Always-on audit trail of agent invocations.
//!
//! One JSON line per reaped agent, appended to `workspace/logs/agents.jsonl`.
//! Provides a history of who ran what without requiring `-v`. Writes are
//! best-effort: a failing audit log never fails the orchestrator.
//!
//! # Growth control
//!
//! Before each write the file size is checked; past 1 MB the current file is
//! renamed to `agents.jsonl.old` and a fresh one started, bounding storage
//! to ~2 MB worst case.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agents::{Backend, Role};

const MAX_LOG_SIZE: u64 = 1_048_576;

/// Audit sink owned by the task manager (no global state).
#[derive(Debug)]
pub struct AuditLog {
    log_path: PathBuf,
    file: Option<File>,
}

impl AuditLog {
    pub fn new(logs_dir: &Path) -> Self {
        Self {
            log_path: logs_dir.join("agents.jsonl"),
            file: None,
        }
    }

    /// Record one finished (or reaped) agent invocation.
    pub fn record(
        &mut self,
        slug: &str,
        role: Role,
        backend: Backend,
        exit_code: Option<i32>,
        duration: Duration,
    ) {
        if let Ok(metadata) = fs::metadata(&self.log_path)
            && metadata.len() > MAX_LOG_SIZE
        {
            let old_path = self.log_path.with_extension("jsonl.old");
            let _ = fs::rename(&self.log_path, &old_path);
            self.file = None;
        }

        if self.file.is_none() {
            if let Some(parent) = self.log_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            self.file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
                .ok();
        }

        let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let entry = serde_json::json!({
            "ts": ts,
            "task": slug,
            "role": role.as_str(),
            "backend": backend.as_str(),
            "exit": exit_code,
            "dur_ms": duration.as_millis() as u64,
        });

        // Single write_all so each JSON line lands atomically.
        let mut buf = entry.to_string();
        buf.push('\n');

        let Some(file) = self.file.as_mut() else {
            return;
        };
        let _ = file.write_all(buf.as_bytes());
    }
}
