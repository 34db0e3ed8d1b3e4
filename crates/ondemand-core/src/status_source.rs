// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Poll-based render status.
//!
//! The renderer reports progress by writing JSON documents into
//! `<working_dir>/JobResults/`. The newest document by modification time is
//! authoritative:
//!
//! ```json
//! { "status": "SUCCESS", "taskId": "...", "reports": [{ "paths": ["report.pdf"] }] }
//! ```

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::job::JobStatus;

/// Directory the renderer writes its result documents to.
pub const RESULTS_DIR: &str = "JobResults";

/// Errors reading render status.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Reading the working directory failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying failure.
        source: std::io::Error,
    },
}

/// Result document written by the renderer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    /// Raw renderer status.
    #[serde(default)]
    pub status: String,
    /// Renderer-side task id.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Produced reports.
    #[serde(default)]
    pub reports: Vec<ReportEntry>,
}

/// One report in a result document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportEntry {
    /// Files produced for the report.
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Map a raw renderer status to a job status.
pub fn map_status(raw: &str) -> JobStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "SUCCESS" => JobStatus::Success,
        "ERROR" => JobStatus::Error,
        "ABORT" | "ABORTED" => JobStatus::Aborted,
        _ => JobStatus::Running,
    }
}

/// Source of render progress for a working directory.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Current status of the job rooted at `working_dir`.
    async fn poll(&self, working_dir: &Path) -> Result<JobStatus, StatusError>;

    /// The produced artifact; latest modification time wins when several exist.
    async fn locate_artifact(&self, working_dir: &Path) -> Result<Option<PathBuf>, StatusError>;
}

/// Reads `JobResults/*.json` from disk.
#[derive(Debug, Clone, Default)]
pub struct FileStatusSource;

impl FileStatusSource {
    /// Create a file status source.
    pub fn new() -> Self {
        Self
    }

    /// Newest result document, if any can be read.
    pub async fn read_latest(&self, working_dir: &Path) -> Result<Option<JobResults>, StatusError> {
        let results_dir = working_dir.join(RESULTS_DIR);
        let mut entries = match tokio::fs::read_dir(&results_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StatusError::Io {
                    path: results_dir,
                    source,
                });
            }
        };

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(StatusError::Io {
                        path: results_dir,
                        source,
                    });
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(modified) = modified_at(&path).await else {
                continue;
            };
            if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
                newest = Some((modified, path));
            }
        }

        let Some((_, path)) = newest else {
            return Ok(None);
        };
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StatusError::Io { path, source }),
        };
        match serde_json::from_str(&raw) {
            Ok(results) => Ok(Some(results)),
            Err(e) => {
                // Usually a document caught mid-write.
                debug!(path = %path.display(), error = %e, "Unreadable result document");
                Ok(None)
            }
        }
    }
}

async fn modified_at(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

#[async_trait]
impl StatusSource for FileStatusSource {
    async fn poll(&self, working_dir: &Path) -> Result<JobStatus, StatusError> {
        if !tokio::fs::try_exists(working_dir).await.unwrap_or(false) {
            return Ok(JobStatus::Aborted);
        }
        Ok(match self.read_latest(working_dir).await? {
            Some(results) => map_status(&results.status),
            None => JobStatus::Pending,
        })
    }

    async fn locate_artifact(&self, working_dir: &Path) -> Result<Option<PathBuf>, StatusError> {
        let Some(results) = self.read_latest(working_dir).await? else {
            return Ok(None);
        };

        let mut best: Option<(SystemTime, PathBuf)> = None;
        for raw in results.reports.iter().flat_map(|r| r.paths.iter()) {
            let candidate = Path::new(raw);
            let path = if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                working_dir.join(candidate)
            };
            let Some(modified) = modified_at(&path).await else {
                debug!(path = %path.display(), "Listed report is missing");
                continue;
            };
            if best.as_ref().is_none_or(|(time, _)| modified > *time) {
                best = Some((modified, path));
            }
        }
        Ok(best.map(|(_, path)| path))
    }
}
