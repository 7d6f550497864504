//! Scheduler side of the launch protocol.
//!
//! Shell jobs are handed to a short-lived launcher process (the outer
//! worker, see [`crate::worker`]) which the scheduler reaps before
//! returning. Callable jobs cannot cross an exec boundary, so they run on
//! tokio's blocking pool instead; a panic there is contained by the task.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::{
    error::{Result, SchedulerError},
    marker::MarkerStore,
    status::StatusQuery,
    types::{Decision, Job, JobCallable, JobCommand, JobContext},
    worker::{run_callable, WorkerRequest, WorkerStage},
};

/// How to start a worker: a program plus the arguments that select its
/// worker mode. `--stage <stage> --request <json>` is appended.
#[derive(Debug, Clone)]
pub struct WorkerProgram {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerProgram {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The running executable, started with `args`.
    pub fn current_exe<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Ok(Self::new(std::env::current_exe()?, args))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub(crate) fn command(&self, stage: WorkerStage, raw_request: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--stage")
            .arg(stage.as_str())
            .arg("--request")
            .arg(raw_request)
            .stdin(Stdio::null());
        cmd
    }
}

/// What `launch` left running.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// The launcher was reaped; the job body (if the limit allowed it)
    /// continues in a detached process.
    Detached { launcher_pid: Option<u32> },
    /// Callable body on the blocking pool. Resolves to the decision, or
    /// `None` if the body failed or panicked.
    Supervised(JoinHandle<Option<Decision>>),
}

/// Starts job instances without ever waiting on a job body.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: WorkerProgram,
    markers: MarkerStore,
}

impl ProcessRunner {
    pub fn new(program: WorkerProgram, markers: MarkerStore) -> Self {
        Self { program, markers }
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    pub fn program(&self) -> &WorkerProgram {
        &self.program
    }

    /// Start one instance of `job` fired at `now`.
    ///
    /// For shell jobs this returns once the launcher has exited and been
    /// reaped. The concurrency limit is checked again by whoever runs the
    /// body.
    ///
    /// # Errors
    ///
    /// - `Spawn`: the launcher could not be started, or reported that it
    ///   could not start the inner worker.
    /// - `Io`: waiting on the launcher failed.
    pub async fn launch(
        &self,
        job: &Job,
        now: DateTime<Utc>,
        status: &StatusQuery,
    ) -> Result<LaunchOutcome> {
        match job.command {
            JobCommand::Shell(ref command) => self.launch_process(job, command, now).await,
            JobCommand::Callable(ref callable) => {
                Ok(self.launch_callable(job, callable.clone(), now, status))
            }
        }
    }

    async fn launch_process(
        &self,
        job: &Job,
        command: &str,
        now: DateTime<Utc>,
    ) -> Result<LaunchOutcome> {
        let request = WorkerRequest {
            job_id: job.id,
            job: job.name.clone(),
            command: command.to_string(),
            max_processes: job.max_processes,
            run_dir: self.markers.root().to_path_buf(),
            fired_at: now,
        };
        let raw = request.encode()?;

        let mut cmd = tokio::process::Command::from(self.program.command(WorkerStage::Outer, &raw));
        let mut launcher = cmd.spawn().map_err(|e| {
            SchedulerError::Spawn(format!(
                "could not start {}: {e}",
                self.program.program.display()
            ))
        })?;
        let launcher_pid = launcher.id();
        debug!(job = %job.name, pid = ?launcher_pid, "spawned launcher");

        let status = launcher.wait().await?;
        debug!(job = %job.name, pid = ?launcher_pid, %status, "reaped launcher");
        if !status.success() {
            return Err(SchedulerError::Spawn(format!(
                "launcher for '{}' exited with {status}",
                job.name
            )));
        }
        Ok(LaunchOutcome::Detached { launcher_pid })
    }

    fn launch_callable(
        &self,
        job: &Job,
        callable: JobCallable,
        now: DateTime<Utc>,
        status: &StatusQuery,
    ) -> LaunchOutcome {
        let ctx = JobContext {
            job_id: job.id,
            job_name: job.name.clone(),
            pid: std::process::id(),
            fired_at: now,
            status: status.clone(),
        };
        let store = self.markers.clone();
        let max_processes = job.max_processes;
        let body =
            tokio::task::spawn_blocking(move || run_callable(&store, &ctx, max_processes, &callable));

        let name = job.name.clone();
        let monitor = tokio::spawn(async move {
            match body.await {
                Ok(Ok(decision)) => Some(decision),
                Ok(Err(e)) => {
                    warn!(job = %name, "{e}");
                    None
                }
                Err(e) if e.is_panic() => {
                    error!(job = %name, "job body panicked");
                    None
                }
                Err(e) => {
                    error!(job = %name, "job task failed: {e}");
                    None
                }
            }
        });
        LaunchOutcome::Supervised(monitor)
    }
}
