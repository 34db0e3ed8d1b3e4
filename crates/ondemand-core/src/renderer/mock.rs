// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock renderer for testing.
//!
//! Simulates the external renderer without spawning processes: after a
//! delay it writes the same `JobResults/*.json` document and artifact the
//! real renderer would, so the on-disk status source sees a real job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;

use super::traits::*;
use crate::job::JobId;
use crate::render_config::{CONFIG_FILE_NAME, RenderConfig};
use crate::status_source::RESULTS_DIR;

/// Mock job state.
#[derive(Debug, Clone)]
struct MockJob {
    stopped: Arc<AtomicBool>,
}

/// Mock renderer for testing.
pub struct MockRenderer {
    jobs: Arc<Mutex<HashMap<JobId, MockJob>>>,
    launched: AtomicUsize,
    stopped: AtomicUsize,
    /// Delay before the results file is written (in milliseconds).
    pub execution_delay_ms: u64,
    /// If true, jobs finish with `ERROR`.
    pub fail_by_default: bool,
    /// If true, jobs report `RUNNING` until stopped.
    pub never_complete: bool,
    /// If true, launching fails.
    pub fail_launch: bool,
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRenderer {
    /// Create a renderer whose jobs succeed.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            launched: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            execution_delay_ms: 10,
            fail_by_default: false,
            never_complete: false,
            fail_launch: false,
        }
    }

    /// Create a renderer whose jobs fail.
    pub fn failing() -> Self {
        Self {
            fail_by_default: true,
            ..Self::new()
        }
    }

    /// Create a renderer whose jobs never reach a terminal status on their own.
    pub fn never_completing() -> Self {
        Self {
            execution_delay_ms: 0,
            never_complete: true,
            ..Self::new()
        }
    }

    /// Create a renderer that cannot start anything.
    pub fn unlaunchable() -> Self {
        Self {
            fail_launch: true,
            ..Self::new()
        }
    }

    /// Number of launches so far.
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    /// Number of stops so far.
    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Whether `job_id` was stopped.
    pub async fn was_stopped(&self, job_id: &JobId) -> bool {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .is_some_and(|job| job.stopped.load(Ordering::SeqCst))
    }
}

/// Write a results document the way the renderer does.
pub async fn write_results(
    working_dir: &Path,
    job_id: JobId,
    status: &str,
    reports: &[PathBuf],
) -> std::io::Result<()> {
    let results = working_dir.join(RESULTS_DIR);
    tokio::fs::create_dir_all(&results).await?;
    let document = json!({
        "status": status,
        "taskId": job_id.to_string(),
        "reports": [{
            "paths": reports
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        }],
    });
    let body = serde_json::to_vec_pretty(&document).map_err(std::io::Error::other)?;
    tokio::fs::write(results.join(format!("{}.json", job_id)), body).await
}

async fn first_format(working_dir: &Path) -> String {
    let raw = tokio::fs::read_to_string(working_dir.join(CONFIG_FILE_NAME))
        .await
        .unwrap_or_default();
    RenderConfig::parse(&raw)
        .ok()
        .and_then(|config| config.formats().into_iter().next())
        .unwrap_or_else(|| "pdf".to_string())
}

#[async_trait]
impl Renderer for MockRenderer {
    fn renderer_type(&self) -> &'static str {
        "mock"
    }

    async fn launch_detached(&self, job_id: JobId, working_dir: PathBuf) -> Result<RendererHandle> {
        if self.fail_launch {
            return Err(RendererError::StartFailed("mock launch failure".to_string()));
        }
        self.launched.fetch_add(1, Ordering::SeqCst);

        let stopped = Arc::new(AtomicBool::new(false));
        self.jobs.lock().await.insert(
            job_id,
            MockJob {
                stopped: stopped.clone(),
            },
        );

        let handle = RendererHandle {
            job_id,
            working_dir: working_dir.clone(),
            pid: None, // Mock doesn't spawn real processes
            started_at: Utc::now(),
        };

        if self.never_complete {
            write_results(&working_dir, job_id, "RUNNING", &[]).await?;
            return Ok(handle);
        }

        let delay = self.execution_delay_ms;
        let fail = self.fail_by_default;
        tokio::spawn(async move {
            if delay > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            if stopped.load(Ordering::SeqCst) || !working_dir.exists() {
                return;
            }

            let outcome = if fail {
                write_results(&working_dir, job_id, "ERROR", &[]).await
            } else {
                let format = first_format(&working_dir).await;
                let artifact = PathBuf::from(format!("report.{}", format));
                match tokio::fs::write(working_dir.join(&artifact), b"mock report").await {
                    Ok(()) => write_results(&working_dir, job_id, "SUCCESS", &[artifact]).await,
                    Err(e) => Err(e),
                }
            };
            if let Err(e) = outcome {
                tracing::debug!(job_id = %job_id, error = %e, "Mock renderer could not write results");
            }
        });

        Ok(handle)
    }

    async fn stop(&self, handle: &RendererHandle) -> Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        if let Some(job) = self.jobs.lock().await.get(&handle.job_id) {
            job.stopped.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_writes_success_results() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = MockRenderer::new();
        let job_id = JobId::new();

        renderer
            .launch_detached(job_id, dir.path().to_path_buf())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let results = dir.path().join(RESULTS_DIR).join(format!("{}.json", job_id));
        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(results).unwrap()).unwrap();
        assert_eq!(document["status"], "SUCCESS");
        assert!(dir.path().join("report.pdf").exists());
        assert_eq!(renderer.launched(), 1);
    }

    #[tokio::test]
    async fn test_stopped_job_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = MockRenderer::new();
        renderer.execution_delay_ms = 100;
        let job_id = JobId::new();

        let handle = renderer
            .launch_detached(job_id, dir.path().to_path_buf())
            .await
            .unwrap();
        renderer.stop(&handle).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;

        assert!(renderer.was_stopped(&job_id).await);
        assert!(!dir.path().join(RESULTS_DIR).exists());
    }

    #[tokio::test]
    async fn test_unlaunchable() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = MockRenderer::unlaunchable();
        let result = renderer
            .launch_detached(JobId::new(), dir.path().to_path_buf())
            .await;
        assert!(matches!(result, Err(RendererError::StartFailed(_))));
        assert_eq!(renderer.launched(), 0);
    }
}
