// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native process renderer.
//!
//! Starts the renderer executable as `<exe> --workdir <dir> [args...]` with
//! null stdio and lets it run detached. A reaper task waits on the child so
//! it never lingers as a zombie; stopping sends SIGKILL by pid.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::traits::*;
use crate::job::JobId;

/// Configuration for [`ProcessRenderer`].
#[derive(Debug, Clone)]
pub struct ProcessRendererConfig {
    /// Renderer executable (absolute path or a name resolved via `PATH`).
    pub executable: PathBuf,
    /// Extra arguments appended after `--workdir <dir>`.
    pub extra_args: Vec<String>,
}

impl Default for ProcessRendererConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("ser-engine"),
            extra_args: Vec::new(),
        }
    }
}

/// Renderer backed by a native child process.
#[derive(Debug, Clone)]
pub struct ProcessRenderer {
    config: ProcessRendererConfig,
}

impl ProcessRenderer {
    /// Create a process renderer.
    pub fn new(config: ProcessRendererConfig) -> Self {
        Self { config }
    }

    /// Configured executable.
    pub fn executable(&self) -> &PathBuf {
        &self.config.executable
    }
}

#[async_trait]
impl Renderer for ProcessRenderer {
    fn renderer_type(&self) -> &'static str {
        "process"
    }

    async fn launch_detached(&self, job_id: JobId, working_dir: PathBuf) -> Result<RendererHandle> {
        let executable = &self.config.executable;
        if executable.components().count() > 1 && !executable.exists() {
            return Err(RendererError::ExecutableNotFound(
                executable.display().to_string(),
            ));
        }

        let mut child = Command::new(executable)
            .arg("--workdir")
            .arg(&working_dir)
            .args(&self.config.extra_args)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    RendererError::ExecutableNotFound(executable.display().to_string())
                }
                _ => RendererError::StartFailed(e.to_string()),
            })?;

        let pid = child.id();
        info!(job_id = %job_id, pid = ?pid, working_dir = %working_dir.display(), "Renderer started");

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(job_id = %job_id, status = %status, "Renderer exited"),
                Err(e) => warn!(job_id = %job_id, error = %e, "Failed to wait for renderer"),
            }
        });

        Ok(RendererHandle {
            job_id,
            working_dir,
            pid,
            started_at: Utc::now(),
        })
    }

    async fn stop(&self, handle: &RendererHandle) -> Result<()> {
        match handle.pid {
            Some(pid) => kill_pid(pid).map(|_| ()),
            None => {
                debug!(job_id = %handle.job_id, "No pid recorded, nothing to stop");
                Ok(())
            }
        }
    }
}

/// Send SIGKILL to `pid`.
///
/// Returns `Ok(false)` when the process no longer exists.
pub fn kill_pid(pid: u32) -> Result<bool> {
    let raw = i32::try_from(pid).map_err(|_| RendererError::StopFailed {
        pid,
        reason: "pid out of range".to_string(),
    })?;

    match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pid, "Sent SIGKILL to renderer");
            Ok(true)
        }
        Err(nix::errno::Errno::ESRCH) => {
            debug!(pid, "Renderer already dead (ESRCH)");
            Ok(false)
        }
        Err(e) => Err(RendererError::StopFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

/// Whether a process with `pid` is still running (zombies count as gone).
pub fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // Field 3 is the state; `Z` marks a zombie awaiting its reaper.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

/// Poll until `pid` is gone or `timeout` elapses.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    !is_alive(pid)
}
