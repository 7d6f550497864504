use std::process::ExitCode;

use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use cronward_core::config::CronwardConfig;
use cronward_gateway::daemon;
use cronward_scheduler::{CronSchedule, ScheduleZone, WorkerProgram, WorkerStage};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CRONWARD_GIT_SHA"), ")");

/// Cron job daemon with per-job concurrency limits.
#[derive(Parser)]
#[command(name = "cronward", version = VERSION)]
struct Cli {
    /// Config file [default: $CRONWARD_CONFIG, then ~/.cronward/cronward.toml]
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Debug-level scheduler and worker logs
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon in the foreground (default)
    Run,

    /// List configured jobs with their next run time
    Jobs,

    /// Print upcoming fire times of a cron expression
    Next {
        /// Five-field expression or macro, e.g. "*/15 * * * *" or "@daily"
        expression: String,

        /// Number of fire times to print
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },

    /// Internal: launch stage of a job instance
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        stage: WorkerStage,

        #[arg(long)]
        request: String,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command.unwrap_or(Command::Run) {
        Command::Worker { stage, request } => {
            let program = worker_program(cli.debug)?;
            Ok(cronward_gateway::worker::dispatch(&program, stage, &request))
        }
        Command::Run => {
            let config = load_config(cli.config.as_deref());
            let program = worker_program(cli.debug)?;
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(daemon::run(config, program))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Jobs => {
            let config = load_config(cli.config.as_deref());
            print_jobs(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Next { expression, count } => {
            let config = load_config(cli.config.as_deref());
            print_next(&expression, count, daemon::schedule_zone(config.daemon.timezone))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "cronward=debug,cronward_gateway=debug,cronward_scheduler=debug,cronward_terminal=info,tower_http=debug"
    } else {
        "cronward=info,cronward_gateway=info,cronward_scheduler=info,cronward_terminal=info,tower_http=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        // stdout belongs to `jobs` and `next` output
        .with_writer(std::io::stderr)
        .init();
}

// load config: explicit path > CRONWARD_CONFIG env > ~/.cronward/cronward.toml
fn load_config(explicit: Option<&str>) -> CronwardConfig {
    let env_path = std::env::var("CRONWARD_CONFIG").ok();
    let path = explicit.or(env_path.as_deref());
    CronwardConfig::load(path).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        CronwardConfig::default()
    })
}

/// This executable's `worker` subcommand, carrying `--debug` along.
fn worker_program(debug: bool) -> anyhow::Result<WorkerProgram> {
    let mut args = Vec::new();
    if debug {
        args.push("--debug");
    }
    args.push("worker");
    Ok(WorkerProgram::current_exe(args)?)
}

fn print_jobs(config: &CronwardConfig) -> anyhow::Result<()> {
    let mut manager = daemon::build_manager(config, worker_program(false)?);
    manager.boot();

    println!(
        "{:<4} {:<20} {:<16} {:<6} {:<27} COMMAND",
        "ID", "NAME", "CRON", "MAX", "NEXT RUN"
    );
    for job in manager.status().jobs() {
        println!(
            "{:<4} {:<20} {:<16} {:<6} {:<27} {}",
            job.id.0,
            job.name,
            job.cron.as_deref().unwrap_or("-"),
            job.max_processes,
            job.next_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            job.command
        );
    }
    Ok(())
}

fn print_next(expression: &str, count: usize, zone: ScheduleZone) -> anyhow::Result<()> {
    let schedule = CronSchedule::parse(expression)?;
    let times: Vec<String> = match zone {
        ScheduleZone::Local => schedule
            .upcoming(Local::now())
            .take(count)
            .map(|t| t.to_rfc3339())
            .collect(),
        ScheduleZone::Utc => schedule
            .upcoming(Utc::now())
            .take(count)
            .map(|t| t.to_rfc3339())
            .collect(),
    };
    if times.is_empty() {
        eprintln!("'{expression}' has no upcoming fire time");
    }
    for t in times {
        println!("{t}");
    }
    Ok(())
}
