//! Daemon wiring: config jobs into a [`JobManager`], the scheduler loop and
//! the status API side by side until a shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use cronward_core::config::{CronwardConfig, TimeZoneSetting};
use cronward_scheduler::{
    JobCommand, JobManager, JobOptions, MarkerStore, ProcessRunner, ScheduleZone, WorkerProgram,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::app::{build_router, AppState};
use crate::shutdown::shutdown_signal;

pub fn schedule_zone(setting: TimeZoneSetting) -> ScheduleZone {
    match setting {
        TimeZoneSetting::Local => ScheduleZone::Local,
        TimeZoneSetting::Utc => ScheduleZone::Utc,
    }
}

/// Build a manager with every `[[jobs]]` entry registered in declaration
/// order. An entry that fails to register is logged and skipped.
pub fn build_manager(config: &CronwardConfig, program: WorkerProgram) -> JobManager {
    let markers = MarkerStore::new(&config.daemon.run_dir);
    let runner = ProcessRunner::new(program, markers);
    let mut manager = JobManager::new(runner).with_zone(schedule_zone(config.daemon.timezone));

    for job in &config.jobs {
        let mut options = JobOptions::new().max_processes(job.max_processes);
        if let Some(ref cron) = job.cron {
            options = options.cron(cron.clone());
        }
        match manager.register(job.name.clone(), JobCommand::shell(job.command.clone()), options) {
            Ok(id) => info!(job = %job.name, job_id = %id, "job registered"),
            Err(e) => warn!(job = %job.name, "skipping job: {e}"),
        }
    }
    manager
}

/// Run the daemon until Ctrl-C or SIGTERM.
pub async fn run(config: CronwardConfig, program: WorkerProgram) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.daemon.run_dir)
        .with_context(|| format!("cannot create run directory {}", config.daemon.run_dir))?;
    info!(run_dir = %config.daemon.run_dir, worker = %program.program().display(), "starting cronward");

    let mut manager = build_manager(&config, program);
    manager.boot();
    let status = manager.status();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(manager.run(shutdown_rx));

    if config.http.enabled {
        let addr: SocketAddr = format!("{}:{}", config.http.bind, config.http.port)
            .parse()
            .context("invalid http.bind / http.port")?;
        let state = Arc::new(AppState::new(config, status));
        let router = build_router(state);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot bind {addr}"))?;
        info!("cronward status API listening on {}", addr);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        info!("status API disabled");
        shutdown_signal().await;
    }

    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    scheduler.await?;
    info!("cronward stopped");
    Ok(())
}
