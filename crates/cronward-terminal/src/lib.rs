//! cronward-terminal: the command-execution primitive used by job workers.
//!
//! Runs a shell command to completion, streaming stdout/stderr line by line
//! to an [`OutputSink`], with no enforced timeout.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use cronward_terminal::{exec::run_streaming, ExecOptions, TracingSink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = TracingSink::new("backup");
//!     let result = run_streaming("echo hello", &ExecOptions::default(), &sink)
//!         .await
//!         .unwrap();
//!     println!("{result}");
//! }
//! ```

pub mod error;
pub mod exec;
pub mod types;

pub use error::{Result, TerminalError};
pub use exec::run_streaming;
pub use types::{ExecOptions, ExecResult, OutputSink, OutputStream, TracingSink};
