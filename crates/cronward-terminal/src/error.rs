//! Error types for the cronward-terminal crate.

use thiserror::Error;

/// All errors that can originate from command execution.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// The shell child process could not be spawned.
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Underlying I/O failure while streaming output or waiting.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TerminalError>;
