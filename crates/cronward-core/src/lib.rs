//! `cronward-core`: configuration and shared error types for the cronward daemon.

pub mod config;
pub mod error;

pub use config::{CronwardConfig, DaemonConfig, HttpConfig, JobConfig, TimeZoneSetting};
pub use error::{CoreError, Result};
