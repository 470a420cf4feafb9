//! Rate-limit detection on the primary backend's output.
//!
//! Agents announce quota exhaustion in their own output; the orchestrator
//! only greps the most recent codex exec/review log for the known markers.
//! Once a task trips this, the flag is sticky for its lifetime (persisted
//! in `.task-state`).

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Substrings the codex backend emits when its quota is exhausted.
pub const RATE_LIMIT_MARKERS: [&str; 2] =
    ["usage_limit_reached", "You've hit your usage limit"];

/// Whether `text` contains any exhaustion marker.
pub fn contains_marker(text: &str) -> bool {
    RATE_LIMIT_MARKERS.iter().any(|m| text.contains(m))
}

/// Scan the most recent codex exec or review log under `agent_logs` for an
/// exhaustion marker. Missing directories or unreadable files read as "not
/// rate limited"; absence of evidence must never flip the sticky flag.
pub fn check_rate_limited(agent_logs: &Path) -> bool {
    match latest_codex_log(agent_logs) {
        Some(path) => std::fs::read_to_string(&path)
            .map(|content| contains_marker(&content))
            .unwrap_or(false),
        None => false,
    }
}

/// Newest `codex-*exec*.log` / `codex-*review*.log` by modification time,
/// falling back to name order when timestamps tie or are unavailable.
fn latest_codex_log(agent_logs: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(agent_logs).ok()?;
    let mut candidates: Vec<(SystemTime, String, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_primary_log_name(&name) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((modified, name, entry.path()));
    }
    candidates.sort();
    candidates.pop().map(|(_, _, path)| path)
}

fn is_primary_log_name(name: &str) -> bool {
    name.starts_with("codex-")
        && name.ends_with(".log")
        && (name.contains("exec") || name.contains("review"))
}
