//! Filesystem-backed run markers.
//!
//! Layout: `<root>/<job name>/<pid>-<uuid>.run`, one file per live job
//! instance, holding a JSON [`MarkerRecord`]. The number of `.run` files in a
//! job's directory is the authoritative count of running instances.
//!
//! Markers are written to a dot-prefixed temp file and renamed into place,
//! so a scan never sees (or counts) a half-written marker. Each worker only
//! ever removes the marker it created.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

pub const MARKER_EXT: &str = "run";
const LOCK_FILE: &str = ".lock";

/// Contents of a marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub job: String,
    pub pid: u32,
    pub created_at: DateTime<Utc>,
}

/// Identifies one persisted marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHandle {
    path: PathBuf,
    record: MarkerRecord,
}

impl MarkerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &MarkerRecord {
        &self.record
    }
}

/// Root directory holding every job's markers.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    root: PathBuf,
}

impl MarkerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a new marker for `job` owned by `pid`.
    pub fn create(&self, job: &str, pid: u32) -> Result<MarkerHandle> {
        let dir = self.job_dir(job);
        fs::create_dir_all(&dir)?;

        let record = MarkerRecord {
            job: job.to_string(),
            pid,
            created_at: Utc::now(),
        };
        let stem = format!("{pid}-{}", Uuid::new_v4().simple());
        let tmp = dir.join(format!(".{stem}.tmp"));
        let path = dir.join(format!("{stem}.{MARKER_EXT}"));

        fs::write(&tmp, serde_json::to_vec(&record)?)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(job, pid, marker = %path.display(), "created run marker");
        Ok(MarkerHandle { path, record })
    }

    /// Delete a marker. Removing an already-removed marker is not an error.
    pub fn remove(&self, handle: &MarkerHandle) -> Result<()> {
        match fs::remove_file(&handle.path) {
            Ok(()) => {
                debug!(job = %handle.record.job, marker = %handle.path.display(), "removed run marker");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of markers currently persisted for `job`. Scans the directory
    /// on every call; nothing is cached.
    pub fn count(&self, job: &str) -> Result<usize> {
        Ok(self.marker_paths(job)?.len())
    }

    /// Records of every live marker for `job`. Markers that disappear or
    /// cannot be decoded mid-scan are skipped.
    pub fn list(&self, job: &str) -> Result<Vec<MarkerRecord>> {
        let mut records = Vec::new();
        for path in self.marker_paths(job)? {
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<MarkerRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(marker = %path.display(), "unreadable run marker: {e}"),
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// Check the limit and create a marker as one step.
    ///
    /// Holds an exclusive advisory lock on the job's directory across the
    /// count and the create, so concurrent workers cannot both squeeze under
    /// `max`. Returns `None` when `max` markers already exist.
    pub fn try_acquire(&self, job: &str, pid: u32, max: u32) -> Result<Option<MarkerGuard>> {
        let dir = self.job_dir(job);
        fs::create_dir_all(&dir)?;
        let _lock = DirLock::exclusive(&dir)?;

        let live = self.count(job)?;
        if live >= max as usize {
            debug!(job, live, max, "marker limit reached");
            return Ok(None);
        }

        let handle = self.create(job, pid)?;
        Ok(Some(MarkerGuard {
            store: self.clone(),
            handle,
            released: false,
        }))
    }

    fn job_dir(&self, job: &str) -> PathBuf {
        self.root.join(job)
    }

    fn marker_paths(&self, job: &str) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(self.job_dir(job)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let path = entry.path();
            let visible = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'));
            if visible && path.extension().is_some_and(|ext| ext == MARKER_EXT) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Owns a marker and removes it when dropped, including during a panic
/// unwind.
#[derive(Debug)]
pub struct MarkerGuard {
    store: MarkerStore,
    handle: MarkerHandle,
    released: bool,
}

impl MarkerGuard {
    pub fn handle(&self) -> &MarkerHandle {
        &self.handle
    }

    /// Remove the marker now, surfacing any I/O error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.remove(&self.handle)
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.remove(&self.handle) {
            warn!(marker = %self.handle.path.display(), "failed to remove run marker: {e}");
        }
    }
}

/// Exclusive `flock(2)` on `<dir>/.lock`, released when the file closes.
struct DirLock {
    _file: File,
}

impl DirLock {
    fn exclusive(dir: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            loop {
                // Safety: the descriptor belongs to `file`, which outlives the call.
                let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
                if rc == 0 {
                    break;
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }

        Ok(Self { _file: file })
    }
}
