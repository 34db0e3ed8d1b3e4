// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job orchestration: the create path and abort.
//!
//! Creating a job resolves the template of every task, prepares an exclusive working
//! directory, authenticates the caller, persists `job.json`, launches the
//! renderer detached and hands the job to a background watcher (see
//! [`crate::watcher`]). Nothing partial survives a failed creation: the
//! working directory is removed and no watcher runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, ProxyConfig};
use crate::content::ContentRepository;
use crate::identity::{Endpoint, UserIdentity};
use crate::job::{JobId, JobRecord, JobStatus, JobStore, JobStoreError};
use crate::render_config::{ConfigValidationError, ConnectionTarget, CreateParams, RenderConfig};
use crate::renderer::{Renderer, RendererError, RendererHandle};
use crate::session::{Session, SessionCache};
use crate::status_source::StatusSource;
use crate::watcher::{JobOutcome, JobWatcher};

/// Default name published reports are stored under.
pub const DEFAULT_REPORT_NAME: &str = "OnDemandReport";

/// Configuration for [`JobOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Parent of all job working directories.
    pub working_dir_root: PathBuf,
    /// Directory relative template references are resolved against.
    pub template_root: PathBuf,
    /// Backing server.
    pub endpoint: Endpoint,
    /// Virtual proxy sessions go through.
    pub proxy: ProxyConfig,
    /// Name published reports are stored under.
    pub report_name: String,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Wait between publishing and resolving the download link.
    pub publish_settle_delay: Duration,
    /// Runtime limit per job (`None` = unlimited).
    pub job_timeout: Option<Duration>,
    /// Maximum number of concurrently watched jobs.
    pub max_active_jobs: usize,
}

impl OrchestratorConfig {
    /// Configuration with defaults for everything but the endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            working_dir_root: PathBuf::from(".data/jobs"),
            template_root: PathBuf::from("templates"),
            endpoint,
            proxy: ProxyConfig::default(),
            report_name: DEFAULT_REPORT_NAME.to_string(),
            poll_interval: Duration::from_millis(250),
            publish_settle_delay: Duration::from_secs(1),
            job_timeout: Some(Duration::from_secs(3600)),
            max_active_jobs: 16,
        }
    }

    /// URI the renderer and the repository client connect to.
    pub fn connect_uri(&self) -> String {
        self.endpoint.join(&[&self.proxy.path])
    }
}

/// Errors creating a job.
#[derive(Debug, Error)]
pub enum JobCreationError {
    /// The template reference does not resolve to a file.
    #[error("Template path {} does not exist", .0.display())]
    TemplateNotFound(PathBuf),

    /// Preparing the working directory failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying failure.
        source: std::io::Error,
    },

    /// Too many jobs are being watched.
    #[error("too many active jobs (limit {0})")]
    CapacityExhausted(usize),

    /// The caller could not be authenticated.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The renderer could not be started.
    #[error("failed to launch renderer: {0}")]
    RendererLaunch(#[from] RendererError),

    /// The supplied configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    /// The job could not be registered.
    #[error("failed to register job: {0}")]
    Store(#[from] JobStoreError),
}

impl JobCreationError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// What to render.
#[derive(Debug, Clone)]
pub enum JobSpec {
    /// Single task built from CREATE parameters.
    Simple(CreateParams),
    /// Caller-supplied configuration (START).
    Custom(RenderConfig),
}

/// Handle to a started job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: JobId,
    working_dir: PathBuf,
    status: watch::Receiver<JobStatus>,
    outcome: watch::Receiver<Option<JobOutcome>>,
}

impl JobHandle {
    /// Job id.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Working directory of the job.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Latest known status.
    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Wait until the watcher has finished with the job (including upload).
    pub async fn wait(&mut self) -> JobOutcome {
        loop {
            let current = self.outcome.borrow().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if self.outcome.changed().await.is_err() {
                let current = self.outcome.borrow().clone();
                return current.unwrap_or_else(|| JobOutcome {
                    status: *self.status.borrow(),
                    link: None,
                });
            }
        }
    }
}

pub(crate) struct OrchestratorInner {
    pub(crate) config: OrchestratorConfig,
    pub(crate) sessions: Arc<SessionCache>,
    pub(crate) jobs: Arc<JobStore>,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) status_source: Arc<dyn StatusSource>,
    pub(crate) content: Arc<dyn ContentRepository>,
    capacity: Arc<Semaphore>,
}

/// Creates, tracks and aborts render jobs.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl JobOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        sessions: Arc<SessionCache>,
        jobs: Arc<JobStore>,
        renderer: Arc<dyn Renderer>,
        status_source: Arc<dyn StatusSource>,
        content: Arc<dyn ContentRepository>,
    ) -> Self {
        let capacity = Arc::new(Semaphore::new(config.max_active_jobs.max(1)));
        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                sessions,
                jobs,
                renderer,
                status_source,
                content,
                capacity,
            }),
        }
    }

    /// Orchestrator configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Session cache.
    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.inner.sessions
    }

    /// Job store.
    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.inner.jobs
    }

    /// Status source watchers poll.
    pub fn status_source(&self) -> &Arc<dyn StatusSource> {
        &self.inner.status_source
    }

    /// Number of jobs currently being watched.
    pub fn active_watchers(&self) -> usize {
        self.inner
            .config
            .max_active_jobs
            .max(1)
            .saturating_sub(self.inner.capacity.available_permits())
    }

    /// The caller's session, if one was established.
    pub fn existing_session(&self, identity: &UserIdentity) -> Option<Arc<Session>> {
        self.inner
            .sessions
            .get_existing(&self.inner.config.endpoint, identity)
    }

    /// Resolve a template reference to an existing file.
    ///
    /// The reference is tried as given, then relative to the template root.
    pub async fn resolve_template(&self, reference: &str) -> Result<PathBuf, JobCreationError> {
        let direct = PathBuf::from(reference);
        if is_file(&direct).await {
            return Ok(direct);
        }
        let rooted = self.inner.config.template_root.join(reference);
        if is_file(&rooted).await {
            return Ok(rooted);
        }
        Err(JobCreationError::TemplateNotFound(rooted))
    }

    /// Start a render job for `identity`.
    pub async fn create_job(
        &self,
        identity: &UserIdentity,
        app_id: &str,
        spec: JobSpec,
    ) -> Result<JobHandle, JobCreationError> {
        let inner = &self.inner;
        let permit = inner
            .capacity
            .clone()
            .try_acquire_owned()
            .map_err(|_| JobCreationError::CapacityExhausted(inner.config.max_active_jobs))?;

        let references = match &spec {
            JobSpec::Simple(params) => vec![params.template.as_str()],
            JobSpec::Custom(config) => config.template_refs(),
        };
        let mut templates = Vec::with_capacity(references.len());
        for reference in references {
            templates.push(self.resolve_template(reference).await?);
        }

        let job_id = JobId::new();
        let working_dir = inner.config.working_dir_root.join(job_id.to_string());
        debug!(job_id = %job_id, templates = templates.len(), "Creating job");

        let template_copies = match prepare_working_dir(&working_dir, &templates).await {
            Ok(paths) => paths,
            Err(e) => {
                remove_dir_best_effort(&working_dir).await;
                return Err(e);
            }
        };

        match self
            .launch(identity, app_id, spec, job_id, &working_dir, &template_copies)
            .await
        {
            Ok((session, status)) => {
                let (outcome_tx, outcome) = watch::channel(None);
                let watcher = JobWatcher::new(
                    inner.clone(),
                    job_id,
                    working_dir.clone(),
                    session,
                    outcome_tx,
                    permit,
                );
                tokio::spawn(watcher.run());

                info!(job_id = %job_id, identity = %identity, "Job started");
                Ok(JobHandle {
                    job_id,
                    working_dir,
                    status,
                    outcome,
                })
            }
            Err(e) => {
                if inner.jobs.get(&job_id).is_some() {
                    let _ = inner
                        .jobs
                        .transition(&job_id, JobStatus::Error, Some(e.to_string()));
                }
                remove_dir_best_effort(&working_dir).await;
                warn!(job_id = %job_id, error = %e, "Job creation failed");
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        identity: &UserIdentity,
        app_id: &str,
        spec: JobSpec,
        job_id: JobId,
        working_dir: &Path,
        template_copies: &[PathBuf],
    ) -> Result<(Arc<Session>, watch::Receiver<JobStatus>), JobCreationError> {
        let inner = &self.inner;
        let config = &inner.config;

        let session = inner
            .sessions
            .get_or_create(&config.endpoint, identity, &config.proxy, Some(job_id))
            .await?;
        session.begin_job(job_id).await;

        let target = ConnectionTarget {
            app_id,
            connect_uri: config.connect_uri(),
            proxy_path: &config.proxy.path,
            credential: &session.credential,
        };
        let render_config = match spec {
            JobSpec::Simple(params) => {
                let template = template_copies
                    .first()
                    .ok_or_else(|| JobCreationError::TemplateNotFound(PathBuf::from(&params.template)))?;
                RenderConfig::build(template, &params, &target)
            }
            JobSpec::Custom(mut custom) => {
                custom.set_templates(template_copies);
                custom.inject_connection(&target);
                custom
            }
        };
        let config_path = render_config
            .write_to(working_dir)
            .await
            .map_err(|e| JobCreationError::io("failed to write job configuration", e))?;

        let status = inner.jobs.insert(JobRecord::new(
            job_id,
            working_dir.to_path_buf(),
            config_path,
        ))?;

        let handle = inner
            .renderer
            .launch_detached(job_id, working_dir.to_path_buf())
            .await?;

        inner.jobs.set_process(&job_id, handle.pid)?;
        session.attach_process(job_id, handle.pid).await;
        inner.jobs.transition(&job_id, JobStatus::Running, None)?;

        Ok((session, status))
    }

    /// Abort the caller's current job.
    ///
    /// The job is marked aborted first so its watcher stops cooperatively,
    /// then the renderer is killed and the working directory removed. A
    /// renderer that already exited is not an error. Returns the aborted job,
    /// if the session had one.
    pub async fn abort(&self, session: &Session) -> Option<JobId> {
        let inner = &self.inner;
        let state = session.snapshot().await;
        let job_id = state.job_id?;

        let record = inner.jobs.get(&job_id);
        if record.is_some() {
            let _ = inner.jobs.transition(&job_id, JobStatus::Aborted, None);
        }

        let working_dir = record
            .as_ref()
            .map(|r| r.working_dir.clone())
            .unwrap_or_else(|| inner.config.working_dir_root.join(job_id.to_string()));
        let handle = RendererHandle {
            job_id,
            working_dir: working_dir.clone(),
            pid: state
                .process_id
                .or_else(|| record.as_ref().and_then(|r| r.process_id)),
            started_at: record
                .as_ref()
                .map(|r| r.created_at)
                .unwrap_or_else(chrono::Utc::now),
        };
        if let Err(e) = inner.renderer.stop(&handle).await {
            warn!(job_id = %job_id, error = %e, "Failed to stop renderer");
        }

        remove_dir_best_effort(&working_dir).await;
        session.clear_for_abort().await;

        info!(job_id = %job_id, "Job aborted");
        Some(job_id)
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Create the exclusive working directory and copy the templates into it.
///
/// Returns the copy for each entry of `templates`. A template listed twice is
/// copied once; distinct templates sharing a file name get an index prefix.
async fn prepare_working_dir(
    working_dir: &Path,
    templates: &[PathBuf],
) -> Result<Vec<PathBuf>, JobCreationError> {
    if let Some(parent) = working_dir.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            JobCreationError::io(format!("failed to create {}", parent.display()), e)
        })?;
    }
    // `create_dir` (not `create_dir_all`) so an existing directory is an error.
    tokio::fs::create_dir(working_dir).await.map_err(|e| {
        JobCreationError::io(format!("failed to create {}", working_dir.display()), e)
    })?;

    let mut copied: HashMap<&Path, PathBuf> = HashMap::new();
    let mut copies = Vec::with_capacity(templates.len());
    for (index, template) in templates.iter().enumerate() {
        if let Some(copy) = copied.get(template.as_path()) {
            copies.push(copy.clone());
            continue;
        }
        let file_name = template
            .file_name()
            .ok_or_else(|| JobCreationError::TemplateNotFound(template.clone()))?;
        let mut copy = working_dir.join(file_name);
        if copied.values().any(|existing| *existing == copy) {
            copy = working_dir.join(format!("{}-{}", index, file_name.to_string_lossy()));
        }
        tokio::fs::copy(template, &copy).await.map_err(|e| {
            JobCreationError::io(format!("failed to copy template {}", template.display()), e)
        })?;
        copied.insert(template.as_path(), copy.clone());
        copies.push(copy);
    }
    Ok(copies)
}

/// Remove a working directory, logging instead of failing.
pub(crate) async fn remove_dir_best_effort(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "Working directory removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove working directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MockSessionExchange, MockTokenMinter};
    use crate::content::MemoryContentRepository;
    use crate::renderer::MockRenderer;
    use crate::session::SessionCacheConfig;
    use crate::status_source::FileStatusSource;

    fn orchestrator(root: &Path, renderer: MockRenderer, max_active_jobs: usize) -> JobOrchestrator {
        let mut config = OrchestratorConfig::new(Endpoint::parse("https://sense.example.com").unwrap());
        config.working_dir_root = root.join("jobs");
        config.template_root = root.join("templates");
        config.poll_interval = Duration::from_millis(10);
        config.publish_settle_delay = Duration::from_millis(1);
        config.max_active_jobs = max_active_jobs;

        let sessions = Arc::new(SessionCache::new(
            Arc::new(MockTokenMinter::new()),
            Arc::new(MockSessionExchange::new()),
            SessionCacheConfig::default(),
        ));
        JobOrchestrator::new(
            config,
            sessions,
            Arc::new(JobStore::new()),
            Arc::new(renderer),
            Arc::new(FileStatusSource::new()),
            Arc::new(MemoryContentRepository::new()),
        )
    }

    fn write_template(root: &Path, name: &str) {
        let templates = root.join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join(name), b"template").unwrap();
    }

    #[tokio::test]
    async fn test_resolve_template_prefers_direct_path() {
        let root = tempfile::tempdir().unwrap();
        write_template(root.path(), "a.xlsx");
        let orchestrator = orchestrator(root.path(), MockRenderer::new(), 4);

        let direct = root.path().join("templates").join("a.xlsx");
        assert_eq!(
            orchestrator.resolve_template(direct.to_str().unwrap()).await.unwrap(),
            direct
        );
        assert_eq!(orchestrator.resolve_template("a.xlsx").await.unwrap(), direct);

        let err = orchestrator.resolve_template("missing.xlsx").await.unwrap_err();
        assert!(err.to_string().contains("missing.xlsx"));
    }

    #[tokio::test]
    async fn test_capacity_exhausted() {
        let root = tempfile::tempdir().unwrap();
        write_template(root.path(), "a.xlsx");
        let orchestrator = orchestrator(root.path(), MockRenderer::never_completing(), 1);
        let identity = UserIdentity::new("CORP", "jdoe");
        let params = || JobSpec::Simple(CreateParams::from_raw("a.xlsx", "pdf", "false"));

        orchestrator.create_job(&identity, "app", params()).await.unwrap();
        let err = orchestrator
            .create_job(&UserIdentity::new("CORP", "other"), "app", params())
            .await
            .unwrap_err();

        assert!(matches!(err, JobCreationError::CapacityExhausted(1)));
        assert_eq!(orchestrator.active_watchers(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_no_directory() {
        let root = tempfile::tempdir().unwrap();
        write_template(root.path(), "a.xlsx");
        let orchestrator = orchestrator(root.path(), MockRenderer::unlaunchable(), 4);

        let err = orchestrator
            .create_job(
                &UserIdentity::new("CORP", "jdoe"),
                "app",
                JobSpec::Simple(CreateParams::from_raw("a.xlsx", "pdf", "false")),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JobCreationError::RendererLaunch(_)));
        let leftovers = std::fs::read_dir(root.path().join("jobs")).unwrap().count();
        assert_eq!(leftovers, 0);
        assert_eq!(orchestrator.active_watchers(), 0);
    }

    #[tokio::test]
    async fn test_custom_config_gets_session_credential() {
        let root = tempfile::tempdir().unwrap();
        write_template(root.path(), "a.xlsx");
        let orchestrator = orchestrator(root.path(), MockRenderer::never_completing(), 4);
        let config = RenderConfig::parse(
            r#"{"tasks":[{"template":{"fileName":"a.xlsx","saveFormats":"xlsx"}}]}"#,
        )
        .unwrap();

        let handle = orchestrator
            .create_job(&UserIdentity::new("CORP", "jdoe"), "app-7", JobSpec::Custom(config))
            .await
            .unwrap();

        let written = std::fs::read_to_string(handle.working_dir().join("job.json")).unwrap();
        let written = RenderConfig::parse(&written).unwrap();
        let task = &written.tasks[0];
        assert_eq!(task.connection.app, "app-7");
        assert_eq!(task.connection.credentials.as_ref().unwrap().value, "session-1");
        assert_eq!(
            PathBuf::from(&task.template.file_name),
            handle.working_dir().join("a.xlsx")
        );
        assert_eq!(handle.status(), JobStatus::Running);
    }

    #[tokio::test]
    async fn test_custom_config_keeps_each_task_template_and_extra_fields() {
        let root = tempfile::tempdir().unwrap();
        write_template(root.path(), "a.xlsx");
        write_template(root.path(), "b.xlsx");
        let other = root.path().join("other");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("a.xlsx"), b"other").unwrap();
        let orchestrator = orchestrator(root.path(), MockRenderer::never_completing(), 4);

        let raw = serde_json::json!({
            "tasks": [
                {
                    "template": {"fileName": "a.xlsx", "saveFormats": "pdf", "outputPath": "/out"},
                    "distribute": {"hub": {"active": true}}
                },
                {
                    "template": {"fileName": "b.xlsx", "saveFormats": "xlsx"},
                    "connection": {"app": "fixed-app"}
                },
                {"template": {"fileName": "a.xlsx"}},
                {"template": {"fileName": other.join("a.xlsx").to_string_lossy()}}
            ]
        });
        let config = RenderConfig::parse(&raw.to_string()).unwrap();

        let handle = orchestrator
            .create_job(&UserIdentity::new("CORP", "jdoe"), "app-7", JobSpec::Custom(config))
            .await
            .unwrap();

        let dir = handle.working_dir();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("job.json")).unwrap()).unwrap();
        let tasks = written["tasks"].as_array().unwrap();
        let file_name = |i: usize| PathBuf::from(tasks[i]["template"]["fileName"].as_str().unwrap());

        assert_eq!(file_name(0), dir.join("a.xlsx"));
        assert_eq!(file_name(1), dir.join("b.xlsx"));
        assert_eq!(file_name(2), dir.join("a.xlsx"));
        assert_eq!(file_name(3), dir.join("3-a.xlsx"));
        assert_eq!(std::fs::read(dir.join("3-a.xlsx")).unwrap(), b"other");

        assert_eq!(tasks[0]["template"]["outputPath"], "/out");
        assert_eq!(tasks[0]["distribute"]["hub"]["active"], true);
        assert!(tasks[0]["template"].get("reportName").is_none());
        assert_eq!(tasks[0]["connection"]["app"], "app-7");
        assert_eq!(tasks[1]["connection"]["app"], "fixed-app");
        assert_eq!(tasks[1]["connection"]["credentials"]["value"], "session-1");
    }
}
