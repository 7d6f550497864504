use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cron::CronSchedule;
use crate::error::{Result, SchedulerError};
use crate::status::StatusQuery;

/// Sequential job identifier: 0 for the first registered job, then 1, 2, …
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u32);

impl JobId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Return type of an in-process job body.
pub type CallableResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// In-process job body. Runs on a blocking thread of the scheduler process.
pub type JobCallable = Arc<dyn Fn(&JobContext) -> CallableResult + Send + Sync>;

/// What a job runs: exactly one of a shell command or a callable.
#[derive(Clone)]
pub enum JobCommand {
    /// Run via `sh -c` inside a detached worker process.
    Shell(String),
    /// Invoked in-process with a [`JobContext`].
    Callable(JobCallable),
}

impl JobCommand {
    pub fn shell(command: impl Into<String>) -> Self {
        JobCommand::Shell(command.into())
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&JobContext) -> CallableResult + Send + Sync + 'static,
    {
        JobCommand::Callable(Arc::new(f))
    }
}

impl fmt::Debug for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobCommand::Shell(cmd) => f.debug_tuple("Shell").field(cmd).finish(),
            JobCommand::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobCommand::Shell(cmd) => f.write_str(cmd),
            JobCommand::Callable(_) => f.write_str("<callable>"),
        }
    }
}

/// Handed to a callable job body.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_name: String,
    /// Pid of the process running the body (the scheduler, for callables).
    pub pid: u32,
    pub fired_at: DateTime<Utc>,
    /// Read access to the scheduler's registry.
    pub status: StatusQuery,
}

/// Optional registration settings.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub cron: Option<String>,
    /// Defaults to 1.
    pub max_processes: Option<u32>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.cron = Some(expression.into());
        self
    }

    pub fn max_processes(mut self, max: u32) -> Self {
        self.max_processes = Some(max);
        self
    }
}

/// Per-job scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Registered, no timer armed. Terminal for jobs without a schedule.
    Idle,
    /// A timer is queued for `next_run`.
    Armed,
    /// The timer expired and the launch is in progress.
    Firing,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Armed => "armed",
            JobState::Firing => "firing",
        };
        write!(f, "{s}")
    }
}

/// Whether a firing should start a new instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run,
    /// `max_processes` instances are already live.
    Skip,
}

/// A registered job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Unique; also the run-marker directory name.
    pub name: String,
    pub command: JobCommand,
    /// `None` = dormant, never auto-scheduled.
    pub schedule: Option<CronSchedule>,
    pub max_processes: u32,
    pub state: JobState,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl Job {
    pub fn has_schedule(&self) -> bool {
        self.schedule.is_some()
    }
}

/// Reject names that are not a single, ordinary path component.
pub fn validate_job_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "name is a relative path component"
    } else if name.starts_with('.') {
        "name starts with '.'"
    } else if name.contains('/') || name.contains('\\') {
        "name contains a path separator"
    } else if name.chars().any(char::is_control) {
        "name contains control characters"
    } else {
        return Ok(());
    };
    Err(SchedulerError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinary_names_pass() {
        for name in ["ping", "nightly-backup", "report_2024", "a.b", "Ünïcode job"] {
            assert!(validate_job_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn path_like_names_fail() {
        for name in ["", ".", "..", ".hidden", "a/b", "a\\b", "tab\tname", "nul\0"] {
            assert!(
                matches!(validate_job_name(name), Err(SchedulerError::InvalidName { .. })),
                "{name:?}"
            );
        }
    }

    #[test]
    fn options_builder_sets_fields() {
        let opts = JobOptions::new().cron("*/5 * * * *").max_processes(3);
        assert_eq!(opts.cron.as_deref(), Some("*/5 * * * *"));
        assert_eq!(opts.max_processes, Some(3));
        assert_eq!(JobOptions::default().max_processes, None);
    }

    #[test]
    fn command_display_hides_callable() {
        assert_eq!(JobCommand::shell("echo hi").to_string(), "echo hi");
        let callable = JobCommand::callable(|_| Ok(()));
        assert_eq!(callable.to_string(), "<callable>");
        assert_eq!(format!("{callable:?}"), "Callable(..)");
    }
}
