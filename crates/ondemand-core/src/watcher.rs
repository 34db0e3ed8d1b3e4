// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background job watcher.
//!
//! One watcher runs per active job. It polls the job until a terminal status,
//! then on success publishes the artifact and stores the download link on
//! the caller's session. The working directory is removed in every case,
//! before the link becomes visible. Failures are logged and only end this
//! watcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::content::{self, ContentContext, ContentUpload, PublishOutcome, UploadError};
use crate::job::{JobId, JobStatus};
use crate::orchestrator::{OrchestratorInner, remove_dir_best_effort};
use crate::renderer::RendererHandle;
use crate::session::Session;
use crate::status_source::StatusError;

/// Final state of a watched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Terminal status.
    pub status: JobStatus,
    /// Download link, when the report was published.
    pub link: Option<String>,
}

/// Errors publishing a finished report.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The status source could not be read.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// The renderer reported success but listed no existing artifact.
    #[error("no report artifact found in {}", .0.display())]
    MissingArtifact(PathBuf),

    /// The artifact could not be renamed.
    #[error("failed to rename {} to {}: {source}", from.display(), to.display())]
    Rename {
        /// Original path.
        from: PathBuf,
        /// Target path.
        to: PathBuf,
        /// Underlying failure.
        source: std::io::Error,
    },

    /// The repository rejected the upload.
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
}

pub(crate) struct JobWatcher {
    inner: Arc<OrchestratorInner>,
    job_id: JobId,
    working_dir: PathBuf,
    session: Arc<Session>,
    outcome: watch::Sender<Option<JobOutcome>>,
    _permit: OwnedSemaphorePermit,
}

impl JobWatcher {
    pub(crate) fn new(
        inner: Arc<OrchestratorInner>,
        job_id: JobId,
        working_dir: PathBuf,
        session: Arc<Session>,
        outcome: watch::Sender<Option<JobOutcome>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            inner,
            job_id,
            working_dir,
            session,
            outcome,
            _permit: permit,
        }
    }

    pub(crate) async fn run(self) {
        let status = self.wait_for_terminal().await;
        debug!(job_id = %self.job_id, status = %status, "Job reached terminal status");

        let link = match status {
            JobStatus::Success => match self.publish().await {
                Ok(link) => link,
                Err(e) => {
                    error!(job_id = %self.job_id, error = %e, "Failed to publish report");
                    None
                }
            },
            _ => None,
        };

        remove_dir_best_effort(&self.working_dir).await;

        if let Some(link) = &link {
            if self.session.publish_link(self.job_id, link.clone()).await {
                info!(job_id = %self.job_id, link = %link, "Report published");
            } else {
                debug!(job_id = %self.job_id, "Session moved on or aborted, link not stored");
            }
        }
        self.outcome.send_replace(Some(JobOutcome { status, link }));
    }

    /// Poll until the job is terminal, honoring aborts and the runtime limit.
    async fn wait_for_terminal(&self) -> JobStatus {
        let jobs = &self.inner.jobs;
        let config = &self.inner.config;
        let started = Instant::now();

        loop {
            match jobs.status(&self.job_id) {
                Some(status) if status.is_terminal() => return status,
                Some(_) => {}
                None => {
                    warn!(job_id = %self.job_id, "Job disappeared from the store");
                    return JobStatus::Aborted;
                }
            }

            if let Some(limit) = config.job_timeout
                && started.elapsed() >= limit
            {
                return self.time_out(limit).await;
            }

            match self.inner.status_source.poll(&self.working_dir).await {
                Ok(status) if status.is_terminal() => {
                    let reason = (status == JobStatus::Error)
                        .then(|| "renderer reported an error".to_string());
                    let _ = jobs.transition(&self.job_id, status, reason);
                    // An abort may have won the race; the store is authoritative.
                    return jobs.status(&self.job_id).unwrap_or(status);
                }
                Ok(JobStatus::Running) => {
                    let _ = jobs.transition(&self.job_id, JobStatus::Running, None);
                }
                Ok(_) => {}
                Err(e) => warn!(job_id = %self.job_id, error = %e, "Failed to poll job status"),
            }

            tokio::time::sleep(config.poll_interval).await;
        }
    }

    async fn time_out(&self, limit: Duration) -> JobStatus {
        warn!(job_id = %self.job_id, limit_ms = limit.as_millis() as u64, "Job exceeded its runtime limit");
        let record = self.inner.jobs.get(&self.job_id);
        let handle = RendererHandle {
            job_id: self.job_id,
            working_dir: self.working_dir.clone(),
            pid: record.as_ref().and_then(|r| r.process_id),
            started_at: record
                .as_ref()
                .map(|r| r.created_at)
                .unwrap_or_else(chrono::Utc::now),
        };
        if let Err(e) = self.inner.renderer.stop(&handle).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to stop timed out renderer");
        }
        let _ = self.inner.jobs.transition(
            &self.job_id,
            JobStatus::Error,
            Some(format!("job exceeded runtime limit of {:?}", limit)),
        );
        self.inner
            .jobs
            .status(&self.job_id)
            .unwrap_or(JobStatus::Error)
    }

    /// Rename and upload the produced report, then resolve its download link.
    async fn publish(&self) -> Result<Option<String>, PublishError> {
        let config = &self.inner.config;
        let artifact = self
            .inner
            .status_source
            .locate_artifact(&self.working_dir)
            .await?
            .ok_or_else(|| PublishError::MissingArtifact(self.working_dir.clone()))?;

        let renamed = rename_artifact(&artifact, &config.report_name).await?;
        let _ = self.inner.jobs.set_artifact(&self.job_id, renamed.clone());

        let ctx = ContentContext {
            endpoint: config.endpoint.clone(),
            base_uri: config.connect_uri(),
            credential: self.session.credential.clone(),
            identity: self.session.identity.clone(),
        };
        let upload = ContentUpload::from_file(&renamed).await?;
        let repo = self.inner.content.as_ref();
        match content::publish(repo, &ctx, &config.report_name, upload).await? {
            PublishOutcome::Created(entry) => {
                debug!(job_id = %self.job_id, content_id = %entry.id, "Shared content created")
            }
            PublishOutcome::Updated(entry) => {
                debug!(job_id = %self.job_id, content_id = %entry.id, "Shared content updated")
            }
        }

        tokio::time::sleep(config.publish_settle_delay).await;

        let link = content::resolve_link(repo, &ctx, &config.report_name).await?;
        if link.is_none() {
            warn!(job_id = %self.job_id, "No document found after upload");
        }
        Ok(link)
    }
}

/// Rename `artifact` to `{report_name}.{ext}` in place.
async fn rename_artifact(artifact: &Path, report_name: &str) -> Result<PathBuf, PublishError> {
    let extension = artifact
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let file_name = if extension.is_empty() {
        report_name.to_string()
    } else {
        format!("{}.{}", report_name, extension)
    };
    let target = artifact.with_file_name(file_name);
    if target != artifact {
        tokio::fs::rename(artifact, &target)
            .await
            .map_err(|source| PublishError::Rename {
                from: artifact.to_path_buf(),
                to: target.clone(),
                source,
            })?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rename_artifact_uses_report_name() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("Sales_2025.PDF");
        std::fs::write(&artifact, b"x").unwrap();

        let renamed = rename_artifact(&artifact, "OnDemandReport").await.unwrap();

        assert_eq!(renamed, dir.path().join("OnDemandReport.pdf"));
        assert!(renamed.exists());
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_rename_missing_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = rename_artifact(&dir.path().join("gone.pdf"), "Report").await;
        assert!(matches!(result, Err(PublishError::Rename { .. })));
    }
}
