//! Git error types and formatting

/// Errors from the git adapter.
///
/// `CommandFailed` is the workhorse: it carries the command line, the exit
/// code, and trimmed stderr so callers can surface exactly what git said.
#[derive(Debug)]
pub enum GitError {
    /// A git command exited non-zero (or was killed by a signal).
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// Git produced output we could not parse.
    Parse(String),
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::CommandFailed {
                command,
                code,
                stderr,
            } => {
                let exit = match code {
                    Some(c) => format!("exit code {c}"),
                    None => "killed by signal".to_string(),
                };
                if stderr.is_empty() {
                    write!(f, "`{command}` failed ({exit})")
                } else {
                    write!(f, "`{command}` failed ({exit}): {stderr}")
                }
            }
            GitError::Parse(msg) => write!(f, "failed to parse git output: {msg}"),
        }
    }
}

impl std::error::Error for GitError {}
