//! Shared data types for cronward-terminal.

use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// ExecOptions
// ---------------------------------------------------------------------------

/// Options for [`crate::exec::run_streaming`].
///
/// No timeout: commands run until they exit on their own.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Shell binary used as `<shell> -c <command>`.
    pub shell: String,
    /// Working directory for the child; `None` inherits the caller's.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub env: Vec<(String, String)>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            cwd: None,
            env: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecResult
// ---------------------------------------------------------------------------

/// How a command finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Process exit code, or `-1` when the child was killed by a signal.
    pub exit_code: i32,
    /// Terminating signal number (Unix only).
    pub signal: Option<i32>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal {
            Some(sig) => write!(f, "killed by signal {sig}"),
            None => write!(f, "exit code {}", self.exit_code),
        }
    }
}

// ---------------------------------------------------------------------------
// Output streaming
// ---------------------------------------------------------------------------

/// Which pipe a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Receives command output one line at a time, as it is produced.
pub trait OutputSink: Send + Sync {
    fn line(&self, stream: OutputStream, line: &str);
}

impl<F> OutputSink for F
where
    F: Fn(OutputStream, &str) + Send + Sync,
{
    fn line(&self, stream: OutputStream, line: &str) {
        self(stream, line)
    }
}

/// Forwards every line to `tracing` at info level, tagged with a label
/// (the job name in practice).
#[derive(Debug, Clone)]
pub struct TracingSink {
    label: String,
}

impl TracingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl OutputSink for TracingSink {
    fn line(&self, stream: OutputStream, line: &str) {
        tracing::info!(job = %self.label, stream = stream.as_str(), "{line}");
    }
}
