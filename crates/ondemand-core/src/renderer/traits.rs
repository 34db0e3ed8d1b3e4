// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Renderer trait definitions.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::JobId;

/// Errors from renderer operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RendererError {
    /// Renderer executable was not found.
    #[error("Renderer executable not found: {0}")]
    ExecutableNotFound(String),

    /// The process could not be started.
    #[error("Renderer start failed: {0}")]
    StartFailed(String),

    /// The process could not be stopped.
    #[error("Failed to stop renderer (pid {pid}): {reason}")]
    StopFailed {
        /// Process id.
        pid: u32,
        /// Underlying failure.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for renderer operations.
pub type Result<T> = std::result::Result<T, RendererError>;

/// Handle for a launched renderer (detached execution).
#[derive(Debug, Clone)]
pub struct RendererHandle {
    /// Job the renderer works for.
    pub job_id: JobId,
    /// Working directory passed to the renderer.
    pub working_dir: PathBuf,
    /// PID of the spawned process, when the backend spawns one.
    pub pid: Option<u32>,
    /// When the renderer was started.
    pub started_at: DateTime<Utc>,
}

/// Trait for renderer backends.
///
/// Renderers only start and stop work. Progress is observed through a
/// [`StatusSource`](crate::status_source::StatusSource) reading the working
/// directory.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Renderer type identifier (e.g., "process", "mock").
    fn renderer_type(&self) -> &'static str;

    /// Start rendering the job in `working_dir` without waiting for it.
    async fn launch_detached(&self, job_id: JobId, working_dir: PathBuf) -> Result<RendererHandle>;

    /// Stop a running renderer. Stopping one that already exited is not an error.
    async fn stop(&self, handle: &RendererHandle) -> Result<()>;
}
