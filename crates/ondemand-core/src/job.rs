// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job records and the in-memory job store.
//!
//! The store is the authority on a job's lifecycle:
//!
//! ```text
//! Pending -> Running -> { Success | Error | Aborted }
//! ```
//!
//! Terminal statuses are sticky. Every transition is broadcast on a per-job
//! `watch` channel so callers can await completion instead of polling.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Globally unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Registered, renderer not yet reporting.
    Pending,
    /// Renderer is working.
    Running,
    /// Renderer finished and produced an artifact.
    Success,
    /// Renderer or post-processing failed.
    Error,
    /// Job was aborted.
    Aborted,
}

impl JobStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Aborted)
    }

    /// Lowercase name, as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job id.
    pub id: JobId,
    /// Working directory exclusively owned by the job.
    pub working_dir: PathBuf,
    /// Persisted render configuration (`job.json`).
    pub config_path: PathBuf,
    /// Pid of the spawned renderer, once launched.
    pub process_id: Option<u32>,
    /// Current status.
    pub status: JobStatus,
    /// Produced artifact after a successful render.
    pub result_artifact: Option<PathBuf>,
    /// Failure reason for `Error` jobs.
    pub error: Option<String>,
    /// When the job was registered.
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a pending record for a job rooted at `working_dir`.
    pub fn new(id: JobId, working_dir: PathBuf, config_path: PathBuf) -> Self {
        Self {
            id,
            working_dir,
            config_path,
            process_id: None,
            status: JobStatus::Pending,
            result_artifact: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Errors returned by [`JobStore`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobStoreError {
    /// A job with the same id already exists.
    #[error("job {0} already exists")]
    DuplicateId(JobId),

    /// Another job already owns the working directory.
    #[error("working directory {} is owned by job {owner}", path.display())]
    DirectoryInUse {
        /// The contested directory.
        path: PathBuf,
        /// The job owning it.
        owner: JobId,
    },

    /// No job with this id.
    #[error("job {0} not found")]
    NotFound(JobId),
}

struct JobEntry {
    record: JobRecord,
    status_tx: watch::Sender<JobStatus>,
}

/// Concurrent map of job records.
#[derive(Default)]
pub struct JobStore {
    jobs: DashMap<JobId, JobEntry>,
}

impl JobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Returns a receiver tracking its status.
    pub fn insert(&self, record: JobRecord) -> Result<watch::Receiver<JobStatus>, JobStoreError> {
        if let Some(owner) = self.owner_of(&record.working_dir) {
            return Err(JobStoreError::DirectoryInUse {
                path: record.working_dir,
                owner,
            });
        }

        match self.jobs.entry(record.id) {
            Entry::Occupied(_) => Err(JobStoreError::DuplicateId(record.id)),
            Entry::Vacant(slot) => {
                let (status_tx, status_rx) = watch::channel(record.status);
                slot.insert(JobEntry { record, status_tx });
                Ok(status_rx)
            }
        }
    }

    fn owner_of(&self, dir: &Path) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|entry| entry.record.working_dir == dir)
            .map(|entry| *entry.key())
    }

    /// Snapshot of a job record.
    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.get(id).map(|entry| entry.record.clone())
    }

    /// Current status of a job.
    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.jobs.get(id).map(|entry| entry.record.status)
    }

    /// Subscribe to status changes of a job.
    pub fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<JobStatus>> {
        self.jobs.get(id).map(|entry| entry.status_tx.subscribe())
    }

    /// Record the renderer's pid.
    pub fn set_process(&self, id: &JobId, pid: Option<u32>) -> Result<(), JobStoreError> {
        let mut entry = self.jobs.get_mut(id).ok_or(JobStoreError::NotFound(*id))?;
        entry.record.process_id = pid;
        Ok(())
    }

    /// Record the produced artifact.
    pub fn set_artifact(&self, id: &JobId, path: PathBuf) -> Result<(), JobStoreError> {
        let mut entry = self.jobs.get_mut(id).ok_or(JobStoreError::NotFound(*id))?;
        entry.record.result_artifact = Some(path);
        Ok(())
    }

    /// Move a job to `status`.
    ///
    /// Returns `Ok(false)` without changing anything when the job is already
    /// terminal.
    pub fn transition(
        &self,
        id: &JobId,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<bool, JobStoreError> {
        let mut entry = self.jobs.get_mut(id).ok_or(JobStoreError::NotFound(*id))?;
        if entry.record.status.is_terminal() {
            return Ok(false);
        }
        if entry.record.status == status {
            return Ok(true);
        }

        entry.record.status = status;
        if status.is_terminal() {
            entry.record.finished_at = Some(Utc::now());
        }
        if error.is_some() {
            entry.record.error = error;
        }
        entry.status_tx.send_replace(status);
        Ok(true)
    }

    /// Forget a job.
    pub fn remove(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.remove(id).map(|(_, entry)| entry.record)
    }

    /// Drop terminal jobs that finished before `cutoff`.
    pub fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| {
            !(entry.record.status.is_terminal()
                && entry.record.finished_at.is_some_and(|at| at < cutoff))
        });
        before.saturating_sub(self.jobs.len())
    }

    /// Number of jobs not yet terminal.
    pub fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|entry| !entry.record.status.is_terminal())
            .count()
    }

    /// Total number of tracked jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
