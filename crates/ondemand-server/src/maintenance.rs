// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker keeping the in-memory state bounded.
//!
//! Each pass:
//! - evicts expired sessions that have no job in flight
//! - drops finished job records older than the retention period
//! - removes job directories left behind by a previous process

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use ondemand_core::{JobId, JobOrchestrator};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Configuration for the maintenance worker.
#[derive(Debug, Clone)]
pub struct MaintenanceWorkerConfig {
    /// How often a pass runs.
    pub poll_interval: Duration,
    /// How long finished job records are kept.
    pub job_retention: Duration,
    /// Minimum age of an untracked job directory before it is removed.
    pub orphan_max_age: Duration,
}

impl Default for MaintenanceWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            job_retention: Duration::from_secs(3600),
            orphan_max_age: Duration::from_secs(24 * 3600),
        }
    }
}

/// What a single pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Sessions evicted.
    pub evicted_sessions: usize,
    /// Job records dropped.
    pub pruned_jobs: usize,
    /// Orphaned directories removed.
    pub removed_dirs: usize,
}

/// Background worker evicting sessions and pruning jobs.
pub struct MaintenanceWorker {
    orchestrator: JobOrchestrator,
    config: MaintenanceWorkerConfig,
    shutdown: Arc<Notify>,
}

impl MaintenanceWorker {
    /// Create a new maintenance worker.
    pub fn new(orchestrator: JobOrchestrator, config: MaintenanceWorkerConfig) -> Self {
        Self {
            orchestrator,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the maintenance loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            job_retention_secs = self.config.job_retention.as_secs(),
            "Maintenance worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Maintenance worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    let report = self.run_once(Utc::now()).await;
                    if report != MaintenanceReport::default() {
                        info!(
                            evicted_sessions = report.evicted_sessions,
                            pruned_jobs = report.pruned_jobs,
                            removed_dirs = report.removed_dirs,
                            "Maintenance pass completed"
                        );
                    }
                }
            }
        }

        info!("Maintenance worker stopped");
    }

    /// Run a single pass as of `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let jobs = self.orchestrator.jobs().clone();
        let evicted_sessions = self.orchestrator.sessions().evict_expired(now, |state| {
            state
                .job_id
                .and_then(|id| jobs.status(&id))
                .is_some_and(|status| !status.is_terminal())
        });

        let pruned_jobs = match cutoff(now, self.config.job_retention) {
            Some(cutoff) => jobs.prune_finished(cutoff),
            None => 0,
        };

        let removed_dirs = match cutoff(now, self.config.orphan_max_age) {
            Some(cutoff) => match self.remove_orphaned_dirs(cutoff).await {
                Ok(removed) => removed,
                Err(e) => {
                    error!(error = %e, "Failed to scan job directories");
                    0
                }
            },
            None => 0,
        };

        MaintenanceReport {
            evicted_sessions,
            pruned_jobs,
            removed_dirs,
        }
    }

    /// Remove job directories no tracked job owns that were last modified
    /// before `cutoff`.
    async fn remove_orphaned_dirs(&self, cutoff: DateTime<Utc>) -> std::io::Result<usize> {
        let root = &self.orchestrator.config().working_dir_root;
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Job directory root does not exist, nothing to clean");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let jobs = self.orchestrator.jobs();
        let mut seen = HashSet::new();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(job_id) = job_dir_id(&path) else {
                continue;
            };
            if !seen.insert(job_id) || jobs.get(&job_id).is_some() {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                _ => continue,
            };
            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(t) => t.into(),
                Err(_) => continue,
            };
            if modified >= cutoff {
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed orphaned job directory");
                    removed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove orphaned job directory")
                }
            }
        }
        Ok(removed)
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
}

/// Job directories are named after their job id.
fn job_dir_id(path: &Path) -> Option<JobId> {
    path.file_name()?.to_str()?.parse().ok()
}
