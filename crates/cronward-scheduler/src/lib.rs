//! `cronward-scheduler`: cron-driven job launcher with filesystem run markers.
//!
//! # Overview
//!
//! A [`JobManager`] holds the registered jobs and one timer per cron job.
//! When a timer expires the job is handed to the [`ProcessRunner`], which
//! starts it without waiting on the job body, and the timer is re-armed from
//! the firing instant.
//!
//! Concurrency is limited per job through [`MarkerStore`]: every live
//! instance owns one marker file, and an instance only starts while fewer
//! than `max_processes` markers exist.
//!
//! # Launch paths
//!
//! | Command    | Where the body runs                                          |
//! |------------|--------------------------------------------------------------|
//! | `Shell`    | Detached grandchild process (`worker` outer, then inner)     |
//! | `Callable` | Blocking task inside the scheduler process                   |

pub mod cron;
pub mod error;
pub mod manager;
pub mod marker;
pub mod runner;
pub mod status;
pub mod types;
pub mod worker;

pub use cron::{CronSchedule, ScheduleZone};
pub use error::{Result, SchedulerError};
pub use manager::{FireOutcome, Firing, JobManager, DEFAULT_MAX_PROCESSES};
pub use marker::{MarkerGuard, MarkerHandle, MarkerRecord, MarkerStore};
pub use runner::{LaunchOutcome, ProcessRunner, WorkerProgram};
pub use status::{JobSnapshot, JobSummary, StatusQuery};
pub use types::{
    CallableResult, Decision, Job, JobCallable, JobCommand, JobContext, JobId, JobOptions,
    JobState,
};
pub use worker::{run_inner, run_outer, WorkerRequest, WorkerStage};
