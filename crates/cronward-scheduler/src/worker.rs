//! Worker side of the launch protocol.
//!
//! The scheduler starts the daemon binary's hidden `worker` subcommand in
//! the [`WorkerStage::Outer`] stage. The outer worker leaves the scheduler's
//! session, starts one more copy of itself in the [`WorkerStage::Inner`]
//! stage and exits at once, so the scheduler only ever waits on a process
//! that lives for a few milliseconds. The inner worker, now parented by the
//! OS, checks the concurrency limit, runs the command and cleans up its
//! run marker.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cronward_terminal::{run_streaming, ExecOptions, TracingSink};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    marker::MarkerStore,
    runner::WorkerProgram,
    types::{validate_job_name, Decision, JobCallable, JobContext, JobId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStage {
    /// Detaches and hands off; reaped by the scheduler.
    Outer,
    /// Runs the job body; reaped by the OS.
    Inner,
}

impl WorkerStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStage::Outer => "outer",
            WorkerStage::Inner => "inner",
        }
    }
}

impl fmt::Display for WorkerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "outer" => Ok(WorkerStage::Outer),
            "inner" => Ok(WorkerStage::Inner),
            other => Err(format!("unknown worker stage: {other}")),
        }
    }
}

/// Everything a worker needs, passed on its command line as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub job_id: JobId,
    pub job: String,
    pub command: String,
    pub max_processes: u32,
    /// Marker store root.
    pub run_dir: PathBuf,
    pub fired_at: DateTime<Utc>,
}

impl WorkerRequest {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Outer stage: leave the scheduler's session, start the inner worker with
/// the same request, and return its pid without waiting for it.
pub fn run_outer(program: &WorkerProgram, raw_request: &str) -> Result<u32> {
    detach_session();

    let child = program
        .command(WorkerStage::Inner, raw_request)
        .spawn()
        .map_err(|e| SchedulerError::Spawn(format!("inner worker spawn failed: {e}")))?;
    let pid = child.id();
    // Never waited on: once this process exits the inner worker is
    // re-parented and reaped by the OS.
    drop(child);

    debug!(pid, "handed job off to inner worker");
    Ok(pid)
}

/// Inner stage: re-check the limit, then run the shell command under a run
/// marker that is removed on every exit path.
pub async fn run_inner(request: &WorkerRequest) -> Result<Decision> {
    validate_job_name(&request.job)?;
    let store = MarkerStore::new(&request.run_dir);
    let pid = std::process::id();
    debug!(job = %request.job, pid, "inner worker started");

    let Some(guard) = store.try_acquire(&request.job, pid, request.max_processes)? else {
        info!(
            job = %request.job,
            max_processes = request.max_processes,
            fired_at = %request.fired_at,
            "Skip the job due to limit of max processes"
        );
        return Ok(Decision::Skip);
    };
    debug!(job = %request.job, marker = %guard.handle().path().display(), "created run marker");
    info!(job = %request.job, pid, fired_at = %request.fired_at, "Running job");

    let sink = TracingSink::new(request.job.clone());
    let outcome = run_streaming(&request.command, &ExecOptions::default(), &sink).await;
    let released = guard.release();

    let detail = match outcome {
        Ok(result) if result.success() => None,
        Ok(result) => Some(result.to_string()),
        Err(e) => Some(e.to_string()),
    };
    finish(&request.job, detail, released)
}

/// Callable counterpart of [`run_inner`]; runs on a blocking thread in the
/// scheduler process. A panic in `callable` unwinds through the marker
/// guard, which removes the marker.
pub(crate) fn run_callable(
    store: &MarkerStore,
    ctx: &JobContext,
    max_processes: u32,
    callable: &JobCallable,
) -> Result<Decision> {
    let Some(guard) = store.try_acquire(&ctx.job_name, ctx.pid, max_processes)? else {
        info!(
            job = %ctx.job_name,
            max_processes,
            fired_at = %ctx.fired_at,
            "Skip the job due to limit of max processes"
        );
        return Ok(Decision::Skip);
    };
    info!(job = %ctx.job_name, job_id = %ctx.job_id, fired_at = %ctx.fired_at, "Running job");

    let outcome = callable(ctx);
    let released = guard.release();
    finish(&ctx.job_name, outcome.err().map(|e| e.to_string()), released)
}

fn finish(job: &str, failure: Option<String>, released: Result<()>) -> Result<Decision> {
    if let Err(ref e) = released {
        warn!(job, "could not remove run marker: {e}");
    }
    if let Some(detail) = failure {
        return Err(SchedulerError::CommandFailure {
            job: job.to_string(),
            detail,
        });
    }
    released?;
    debug!(job, "Finished the job");
    Ok(Decision::Run)
}

/// Start a new session so terminal hangups aimed at the daemon's session
/// never reach job processes.
fn detach_session() {
    #[cfg(unix)]
    {
        // Safety: setsid(2) has no memory-safety preconditions.
        if unsafe { libc::setsid() } == -1 {
            warn!("setsid failed: {}", std::io::Error::last_os_error());
        }
    }
}
