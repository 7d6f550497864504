//! Read-only view of the job registry for the status API.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manager::SharedRegistry;
use crate::types::{Job, JobId, JobState};

/// `{id, name}` pair served by the jobs listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
}

/// Point-in-time copy of everything observable about a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    /// Shell command, or `<callable>`.
    pub command: String,
    pub cron: Option<String>,
    pub max_processes: u32,
    pub state: JobState,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            command: job.command.to_string(),
            cron: job.schedule.as_ref().map(|s| s.expression().to_string()),
            max_processes: job.max_processes,
            state: job.state,
            last_run: job.last_run,
            next_run: job.next_run,
        }
    }
}

/// Cheap, clonable handle; every call reads the live registry.
#[derive(Clone)]
pub struct StatusQuery {
    registry: SharedRegistry,
}

impl StatusQuery {
    pub(crate) fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Jobs in registration order.
    pub fn list_jobs(&self) -> Vec<JobSummary> {
        crate::manager::read(&self.registry)
            .jobs()
            .iter()
            .map(|job| JobSummary {
                id: job.id,
                name: job.name.clone(),
            })
            .collect()
    }

    pub fn job_count(&self) -> usize {
        crate::manager::read(&self.registry).len()
    }

    /// Full snapshots in registration order.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        crate::manager::read(&self.registry)
            .jobs()
            .iter()
            .map(JobSnapshot::from)
            .collect()
    }

    pub fn job(&self, name: &str) -> Option<JobSnapshot> {
        crate::manager::read(&self.registry)
            .by_name(name)
            .map(JobSnapshot::from)
    }
}

impl fmt::Debug for StatusQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusQuery")
            .field("jobs", &self.job_count())
            .finish()
    }
}
