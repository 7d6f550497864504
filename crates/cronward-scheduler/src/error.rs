use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression could not be parsed.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// A job with this name is already registered.
    #[error("'{name}' is already registered as a job")]
    DuplicateName { name: String },

    /// The job name cannot be used as a run-marker namespace.
    #[error("Invalid job name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Registration options were rejected (e.g. `max_processes = 0`).
    #[error("Invalid job options: {0}")]
    InvalidOptions(String),

    /// A worker process could not be created.
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// The run-marker store could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker request or marker record could not be (de)serialised.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The job's command exited non-zero, was killed, or panicked.
    #[error("Job '{job}' failed: {detail}")]
    CommandFailure { job: String, detail: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
