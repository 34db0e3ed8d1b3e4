// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function dispatch.
//!
//! Every RPC call names a function and carries the caller's identity. The
//! dispatcher turns the call into an orchestrator or cache operation and
//! always answers with a single [`OnDemandResult`]; failures become status
//! `-1` with the error text in `log` and never escape as transport faults.
//!
//! | id | function | parameters |
//! |----|----------|------------|
//! | 1 | CREATE | `TemplateFilename`, `OutputFormat`, `UseSelection` |
//! | 2 | STATUS | none |
//! | 3 | ABORT | none |
//! | 4 | START | `Script` (inline JSON or a `.json`/`.hjson` path) |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::identity::UserIdentity;
use crate::job::{JobId, JobStatus};
use crate::orchestrator::{JobCreationError, JobOrchestrator, JobSpec};
use crate::render_config::{ConfigValidationError, CreateParams, RenderConfig};
use crate::status_source::StatusError;

/// Accepted, still in progress.
pub const STATUS_IN_PROGRESS: i32 = 0;
/// Complete.
pub const STATUS_COMPLETE: i32 = 100;
/// Aborted.
pub const STATUS_ABORTED: i32 = 1;
/// Failed; `log` explains why.
pub const STATUS_FAILED: i32 = -1;

/// Output format used when a CREATE call leaves it empty.
pub const DEFAULT_OUTPUT_FORMAT: &str = "pdf";

/// Identifier of the plugin in the capabilities document.
pub const PLUGIN_IDENTIFIER: &str = "SerOnDemand";

/// Callable functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FunctionId {
    /// Create a report job from parameters.
    Create = 1,
    /// Report the caller's job status.
    Status = 2,
    /// Abort the caller's job.
    Abort = 3,
    /// Start a job from a full configuration.
    Start = 4,
}

impl FunctionId {
    /// All functions, in id order.
    pub const ALL: [FunctionId; 4] = [Self::Create, Self::Status, Self::Abort, Self::Start];

    /// Wire id.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Function name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Status => "STATUS",
            Self::Abort => "ABORT",
            Self::Start => "START",
        }
    }

    /// Parameter names, in order.
    pub fn params(self) -> &'static [&'static str] {
        match self {
            Self::Create => &["TemplateFilename", "OutputFormat", "UseSelection"],
            Self::Status | Self::Abort => &[],
            Self::Start => &["Script"],
        }
    }
}

impl TryFrom<i32> for FunctionId {
    type Error = DispatchError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|f| f.id() == value)
            .ok_or(DispatchError::UnknownFunction(value))
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnDemandResult {
    /// Status code (`0`, `100`, `1`, `-1`).
    pub status: i32,
    /// Job the call refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Download link of the published report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl OnDemandResult {
    fn with_status(status: i32, job_id: Option<JobId>) -> Self {
        Self {
            status,
            task_id: job_id.map(|id| id.to_string()),
            link: None,
            log: None,
        }
    }

    /// Failed result carrying `log`.
    pub fn failed(log: impl Into<String>) -> Self {
        Self {
            status: STATUS_FAILED,
            task_id: None,
            link: None,
            log: Some(log.into()),
        }
    }
}

/// Errors turned into `-1` results.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Function id is not one of the known functions.
    #[error("Unknown function id {0}.")]
    UnknownFunction(i32),

    /// A required parameter was missing or empty.
    #[error("missing parameter '{0}'")]
    MissingParameter(&'static str),

    /// No session exists for the caller.
    #[error("No existing session found.")]
    NoSession,

    /// The session has no job to report on.
    #[error("session has no job")]
    NoJob,

    /// The session's job is no longer tracked.
    #[error("job {0} is not tracked")]
    UnknownJob(JobId),

    /// The renderer failed.
    #[error("report rendering failed: {0}")]
    RenderFailure(String),

    /// Job creation failed.
    #[error(transparent)]
    JobCreation(#[from] JobCreationError),

    /// A START configuration was invalid.
    #[error(transparent)]
    ConfigValidation(#[from] ConfigValidationError),

    /// Job status could not be read.
    #[error(transparent)]
    Status(#[from] StatusError),
}

/// Caller metadata accompanying every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Caller.
    pub identity: UserIdentity,
    /// Target application, when supplied.
    pub app_id: Option<String>,
}

/// One parameter definition in the capabilities document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    pub data_type: String,
}

/// One function definition in the capabilities document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    /// Function name.
    pub name: String,
    /// Wire id.
    pub function_id: i32,
    /// Function kind.
    pub function_type: String,
    /// Return type.
    pub return_type: String,
    /// Parameters, in order.
    pub params: Vec<ParameterDefinition>,
}

/// Capabilities document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Plugin identifier.
    pub plugin_identifier: String,
    /// Plugin version.
    pub plugin_version: String,
    /// Whether script evaluation is offered.
    pub allow_script: bool,
    /// Callable functions.
    pub functions: Vec<FunctionDefinition>,
}

/// Describe the callable functions.
pub fn capabilities() -> Capabilities {
    Capabilities {
        plugin_identifier: PLUGIN_IDENTIFIER.to_string(),
        plugin_version: env!("CARGO_PKG_VERSION").to_string(),
        allow_script: false,
        functions: FunctionId::ALL
            .into_iter()
            .map(|function| FunctionDefinition {
                name: function.name().to_string(),
                function_id: function.id(),
                function_type: "Scalar".to_string(),
                return_type: "String".to_string(),
                params: function
                    .params()
                    .iter()
                    .map(|name| ParameterDefinition {
                        name: name.to_string(),
                        data_type: "String".to_string(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Resolves calls to job operations.
#[derive(Clone)]
pub struct FunctionDispatcher {
    orchestrator: JobOrchestrator,
}

impl FunctionDispatcher {
    /// Create a dispatcher.
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// The orchestrator calls are dispatched to.
    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    /// Execute a call. Never fails: errors become a `-1` result.
    pub async fn dispatch(&self, ctx: &CallContext, function_id: i32, params: &[String]) -> OnDemandResult {
        info!(identity = %ctx.identity, app_id = ?ctx.app_id, function_id, "Function call");
        match self.try_dispatch(ctx, function_id, params).await {
            Ok(result) => {
                debug!(identity = %ctx.identity, status = result.status, "Function call completed");
                result
            }
            Err(e) => {
                error!(identity = %ctx.identity, function_id, error = %e, "Function call failed");
                OnDemandResult::failed(e.to_string())
            }
        }
    }

    async fn try_dispatch(
        &self,
        ctx: &CallContext,
        function_id: i32,
        params: &[String],
    ) -> Result<OnDemandResult, DispatchError> {
        match FunctionId::try_from(function_id)? {
            FunctionId::Create => self.create(ctx, params).await,
            FunctionId::Status => self.status(ctx).await,
            FunctionId::Abort => self.abort(ctx).await,
            FunctionId::Start => self.start(ctx, params).await,
        }
    }

    async fn create(&self, ctx: &CallContext, params: &[String]) -> Result<OnDemandResult, DispatchError> {
        let template = param(params, 0)
            .filter(|t| !t.trim().is_empty())
            .ok_or(DispatchError::MissingParameter("TemplateFilename"))?;
        let formats = param(params, 1)
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(DEFAULT_OUTPUT_FORMAT);
        let use_selection = param(params, 2).unwrap_or("false");

        let spec = JobSpec::Simple(CreateParams::from_raw(template, formats, use_selection));
        let handle = self
            .orchestrator
            .create_job(&ctx.identity, ctx.app_id.as_deref().unwrap_or_default(), spec)
            .await?;
        Ok(OnDemandResult::with_status(STATUS_IN_PROGRESS, Some(handle.job_id())))
    }

    async fn start(&self, ctx: &CallContext, params: &[String]) -> Result<OnDemandResult, DispatchError> {
        let payload = param(params, 0)
            .filter(|p| !p.trim().is_empty())
            .ok_or(DispatchError::MissingParameter("Script"))?;
        let config = RenderConfig::from_inline_or_path(payload).await?;
        debug!(identity = %ctx.identity, "Script is valid");

        let handle = self
            .orchestrator
            .create_job(
                &ctx.identity,
                ctx.app_id.as_deref().unwrap_or_default(),
                JobSpec::Custom(config),
            )
            .await?;
        Ok(OnDemandResult::with_status(STATUS_IN_PROGRESS, Some(handle.job_id())))
    }

    async fn status(&self, ctx: &CallContext) -> Result<OnDemandResult, DispatchError> {
        let session = self
            .orchestrator
            .existing_session(&ctx.identity)
            .ok_or(DispatchError::NoSession)?;
        let state = session.snapshot().await;

        if state.aborted {
            return Ok(OnDemandResult::with_status(STATUS_ABORTED, state.job_id));
        }

        if let Some(link) = state.download_link {
            let mut result = OnDemandResult::with_status(STATUS_COMPLETE, state.job_id);
            result.link = Some(link);
            return Ok(result);
        }

        let job_id = state.job_id.ok_or(DispatchError::NoJob)?;
        let record = self
            .orchestrator
            .jobs()
            .get(&job_id)
            .ok_or(DispatchError::UnknownJob(job_id))?;

        let status = if record.status.is_terminal() {
            record.status
        } else {
            self.orchestrator
                .status_source()
                .poll(&record.working_dir)
                .await?
        };

        let code = match status {
            JobStatus::Success => STATUS_COMPLETE,
            JobStatus::Aborted => STATUS_ABORTED,
            JobStatus::Error => {
                return Err(DispatchError::RenderFailure(
                    record
                        .error
                        .unwrap_or_else(|| "renderer reported an error".to_string()),
                ));
            }
            JobStatus::Pending | JobStatus::Running => STATUS_IN_PROGRESS,
        };
        Ok(OnDemandResult::with_status(code, Some(job_id)))
    }

    async fn abort(&self, ctx: &CallContext) -> Result<OnDemandResult, DispatchError> {
        let session = self
            .orchestrator
            .existing_session(&ctx.identity)
            .ok_or(DispatchError::NoSession)?;
        let job_id = self.orchestrator.abort(&session).await;
        Ok(OnDemandResult::with_status(STATUS_ABORTED, job_id))
    }
}

fn param(params: &[String], index: usize) -> Option<&str> {
    params.get(index).map(String::as_str)
}
