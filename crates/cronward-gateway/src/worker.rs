//! Entrypoints of the hidden `worker` subcommand.

use std::process::ExitCode;

use cronward_scheduler::{
    run_inner, run_outer, Decision, SchedulerError, WorkerProgram, WorkerRequest, WorkerStage,
};
use tracing::{debug, error, warn};

/// Outer stage. Synchronous: it only detaches, spawns and exits, so no
/// runtime is started.
pub fn outer(program: &WorkerProgram, raw_request: &str) -> ExitCode {
    match run_outer(program, raw_request) {
        Ok(pid) => {
            debug!(pid, "outer worker exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Inner stage: runs the job body on a single-threaded runtime.
pub fn inner(raw_request: &str) -> ExitCode {
    let request = match WorkerRequest::decode(raw_request) {
        Ok(request) => request,
        Err(e) => {
            error!("bad worker request: {e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(job = %request.job, "cannot start worker runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_inner(&request)) {
        Ok(Decision::Run) | Ok(Decision::Skip) => ExitCode::SUCCESS,
        Err(e @ SchedulerError::CommandFailure { .. }) => {
            warn!(job = %request.job, job_id = %request.job_id, "{e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(job = %request.job, job_id = %request.job_id, "{e}");
            ExitCode::FAILURE
        }
    }
}

pub fn dispatch(program: &WorkerProgram, stage: WorkerStage, raw_request: &str) -> ExitCode {
    match stage {
        WorkerStage::Outer => outer(program, raw_request),
        WorkerStage::Inner => inner(raw_request),
    }
}
