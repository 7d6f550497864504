use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    cron::{CronSchedule, ScheduleZone},
    error::{Result, SchedulerError},
    runner::{LaunchOutcome, ProcessRunner},
    status::StatusQuery,
    types::{validate_job_name, Job, JobCommand, JobId, JobOptions, JobState},
};

/// Instances allowed at once when registration leaves it unset.
pub const DEFAULT_MAX_PROCESSES: u32 = 1;

/// Upper bound on one sleep of the event loop, so wall-clock jumps are
/// noticed within a minute.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Jobs in registration order plus a name index.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    jobs: Vec<Job>,
    by_name: HashMap<String, JobId>,
}

impl Registry {
    pub(crate) fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<&Job> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub(crate) fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id.index())
    }

    fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id.index())
    }
}

pub(crate) type SharedRegistry = Arc<RwLock<Registry>>;

// A panic while holding the lock cannot leave a half-updated job behind
// (every write is a plain field store), so poisoning is ignored.
pub(crate) fn read(registry: &SharedRegistry) -> RwLockReadGuard<'_, Registry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(registry: &SharedRegistry) -> RwLockWriteGuard<'_, Registry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

/// What happened to one expired timer.
#[derive(Debug)]
pub enum FireOutcome {
    /// Handed to the runner.
    Launched(LaunchOutcome),
    /// `max_processes` instances were already live.
    Skipped,
    /// The runner could not start the job; counted as a missed run.
    LaunchFailed(String),
}

#[derive(Debug)]
pub struct Firing {
    pub job: JobId,
    /// When the timer was due.
    pub fires_at: DateTime<Utc>,
    pub outcome: FireOutcome,
}

/// Owns the job registry and the timer queue.
///
/// Timers are `(fires_at, job)` entries in a min-heap; the loop in
/// [`JobManager::run`] sleeps until the earliest one, fires everything due
/// and re-arms each fired job from the firing instant.
pub struct JobManager {
    registry: SharedRegistry,
    timers: BinaryHeap<Reverse<(DateTime<Utc>, JobId)>>,
    runner: ProcessRunner,
    zone: ScheduleZone,
}

impl JobManager {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            registry: SharedRegistry::default(),
            timers: BinaryHeap::new(),
            runner,
            zone: ScheduleZone::default(),
        }
    }

    /// Evaluate cron fields in `zone` instead of the local time zone.
    pub fn with_zone(mut self, zone: ScheduleZone) -> Self {
        self.zone = zone;
        self
    }

    /// Add a job. Ids are handed out sequentially from 0.
    ///
    /// Nothing is armed until [`JobManager::boot`]; jobs registered after
    /// boot stay idle until the next boot. A failed registration leaves the
    /// registry untouched.
    ///
    /// # Errors
    ///
    /// - `InvalidName`: the name cannot serve as a marker directory.
    /// - `InvalidOptions`: `max_processes` is 0.
    /// - `InvalidExpression`: the cron expression does not parse.
    /// - `DuplicateName`: a job with this name already exists.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        command: JobCommand,
        options: JobOptions,
    ) -> Result<JobId> {
        let name = name.into();
        validate_job_name(&name)?;

        let max_processes = options.max_processes.unwrap_or(DEFAULT_MAX_PROCESSES);
        if max_processes == 0 {
            return Err(SchedulerError::InvalidOptions(format!(
                "max_processes for '{name}' must be at least 1"
            )));
        }
        let schedule = options
            .cron
            .as_deref()
            .map(CronSchedule::parse)
            .transpose()?;

        let mut registry = write(&self.registry);
        if registry.by_name.contains_key(&name) {
            return Err(SchedulerError::DuplicateName { name });
        }

        let id = JobId(registry.jobs.len() as u32);
        debug!(job = %name, job_id = %id, command = %command, "registered job");
        registry.by_name.insert(name.clone(), id);
        registry.jobs.push(Job {
            id,
            name,
            command,
            schedule,
            max_processes,
            state: JobState::Idle,
            last_run: None,
            next_run: None,
        });
        Ok(id)
    }

    pub fn boot(&mut self) {
        self.boot_at(Utc::now());
    }

    /// Stamp every job's last run with `now` and arm a timer for each cron
    /// job that has a future match.
    pub fn boot_at(&mut self, now: DateTime<Utc>) {
        self.timers.clear();

        let mut armed = Vec::new();
        {
            let mut registry = write(&self.registry);
            for job in registry.jobs.iter_mut() {
                info!(job_id = %job.id, job = %job.name, "Initializing job");
                job.last_run = Some(now);
                job.next_run = job
                    .schedule
                    .as_ref()
                    .and_then(|s| self.zone.next_after(s, now));
                match job.next_run {
                    Some(at) => {
                        job.state = JobState::Armed;
                        armed.push((job.id, job.name.clone(), at));
                    }
                    None => {
                        if job.has_schedule() {
                            warn!(job = %job.name, "cron expression never matches; job stays idle");
                        }
                        job.state = JobState::Idle;
                    }
                }
            }
        }

        for (id, name, at) in armed {
            self.arm(id, &name, at, now);
        }
    }

    /// Earliest armed timer.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.peek().map(|Reverse((at, _))| *at)
    }

    /// Fire every timer due at or before `now`, in expiration order.
    ///
    /// Each fired job gets `last_run = now` and a fresh timer computed from
    /// `now`, whatever the launch outcome.
    pub async fn fire_due(&mut self, now: DateTime<Utc>) -> Vec<Firing> {
        let mut fired = Vec::new();
        while let Some(&Reverse((fires_at, id))) = self.timers.peek() {
            if fires_at > now {
                break;
            }
            self.timers.pop();

            let Some(job) = self.begin_firing(id, fires_at) else {
                continue;
            };
            let outcome = self.launch(&job, now).await;
            self.reschedule(id, now);
            fired.push(Firing {
                job: id,
                fires_at,
                outcome,
            });
        }
        fired
    }

    /// Event loop. Runs until `shutdown` broadcasts `true` or its sender is
    /// dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(jobs = self.job_count(), "scheduler started");

        loop {
            let pause = self
                .next_deadline()
                .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(MAX_SLEEP)
                .min(MAX_SLEEP);

            tokio::select! {
                _ = tokio::time::sleep(pause) => {
                    self.fire_due(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Snapshot of every job in registration order.
    pub fn get_jobs(&self) -> Vec<Job> {
        read(&self.registry).jobs().to_vec()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        read(&self.registry).get(id).cloned()
    }

    pub fn job_count(&self) -> usize {
        read(&self.registry).len()
    }

    pub fn status(&self) -> StatusQuery {
        StatusQuery::new(Arc::clone(&self.registry))
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn zone(&self) -> ScheduleZone {
        self.zone
    }

    // --- private helpers ---------------------------------------------------

    fn arm(&mut self, id: JobId, name: &str, at: DateTime<Utc>, now: DateTime<Utc>) {
        self.timers.push(Reverse((at, id)));
        debug!(
            job = name,
            job_id = %id,
            fires_at = %at,
            in_secs = (at - now).num_seconds(),
            "Added new timer"
        );
    }

    /// Mark the job as firing and return a copy to launch. `None` for a timer
    /// that no longer matches the job's next run.
    fn begin_firing(&self, id: JobId, fires_at: DateTime<Utc>) -> Option<Job> {
        let mut registry = write(&self.registry);
        let Some(job) = registry.get_mut(id) else {
            warn!(job_id = %id, "timer fired for unknown job");
            return None;
        };
        if job.next_run != Some(fires_at) {
            debug!(job = %job.name, fires_at = %fires_at, "dropping stale timer");
            return None;
        }
        job.state = JobState::Firing;
        Some(job.clone())
    }

    async fn launch(&self, job: &Job, now: DateTime<Utc>) -> FireOutcome {
        // Workers re-check under a lock; this read just saves a spawn.
        match self.runner.markers().count(&job.name) {
            Ok(live) if live >= job.max_processes as usize => {
                info!(
                    job = %job.name,
                    live,
                    max_processes = job.max_processes,
                    "Skip the job due to limit of max processes"
                );
                return FireOutcome::Skipped;
            }
            Ok(_) => {}
            Err(e) => warn!(job = %job.name, "could not count run markers: {e}"),
        }

        debug!(job = %job.name, job_id = %job.id, "launching job");
        match self.runner.launch(job, now, &self.status()).await {
            Ok(launched) => FireOutcome::Launched(launched),
            Err(e) => {
                warn!(job = %job.name, job_id = %job.id, "launch failed, run missed: {e}");
                FireOutcome::LaunchFailed(e.to_string())
            }
        }
    }

    fn reschedule(&mut self, id: JobId, now: DateTime<Utc>) {
        let next = {
            let mut registry = write(&self.registry);
            let Some(job) = registry.get_mut(id) else {
                return;
            };
            job.last_run = Some(now);
            job.next_run = job
                .schedule
                .as_ref()
                .and_then(|s| self.zone.next_after(s, now));
            job.state = if job.next_run.is_some() {
                JobState::Armed
            } else {
                JobState::Idle
            };
            job.next_run.map(|at| (job.name.clone(), at))
        };

        if let Some((name, at)) = next {
            self.arm(id, &name, at, now);
        }
    }
}
