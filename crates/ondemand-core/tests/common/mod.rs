// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for ondemand-core integration tests.
//!
//! Provides a TestContext wiring the dispatcher to mock authentication, an
//! in-memory content repository and a caller-chosen renderer, all rooted in
//! a temporary directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ondemand_core::auth::{MockSessionExchange, MockTokenMinter};
use ondemand_core::content::MemoryContentRepository;
use ondemand_core::renderer::Renderer;
use ondemand_core::status_source::FileStatusSource;
use ondemand_core::{
    CallContext, Endpoint, FunctionDispatcher, JobOrchestrator, JobStore, OnDemandResult,
    OrchestratorConfig, SessionCache, SessionCacheConfig, UserIdentity,
};

pub const ENDPOINT: &str = "https://sense.example.com";

/// Test context holding the dispatcher and handles to every double.
pub struct TestContext {
    pub dispatcher: FunctionDispatcher,
    pub orchestrator: JobOrchestrator,
    pub minter: Arc<MockTokenMinter>,
    pub exchange: Arc<MockSessionExchange>,
    pub content: Arc<MemoryContentRepository>,
    pub root: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// Context with fast polling and no job timeout.
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self::with_config(renderer, |_| {})
    }

    /// Context with a customized orchestrator configuration.
    pub fn with_config(
        renderer: Arc<dyn Renderer>,
        customize: impl FnOnce(&mut OrchestratorConfig),
    ) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let root = temp_dir.path().to_path_buf();

        let mut config = OrchestratorConfig::new(Endpoint::parse(ENDPOINT).expect("endpoint"));
        config.working_dir_root = root.join("jobs");
        config.template_root = root.join("templates");
        config.poll_interval = Duration::from_millis(10);
        config.publish_settle_delay = Duration::from_millis(5);
        config.job_timeout = None;
        customize(&mut config);

        let minter = Arc::new(MockTokenMinter::new());
        let exchange = Arc::new(MockSessionExchange::new());
        let content = Arc::new(MemoryContentRepository::new());
        let sessions = Arc::new(SessionCache::new(
            minter.clone(),
            exchange.clone(),
            SessionCacheConfig::default(),
        ));

        let orchestrator = JobOrchestrator::new(
            config,
            sessions,
            Arc::new(JobStore::new()),
            renderer,
            Arc::new(FileStatusSource::new()),
            content.clone(),
        );

        std::fs::create_dir_all(root.join("templates")).expect("templates dir");

        Self {
            dispatcher: FunctionDispatcher::new(orchestrator.clone()),
            orchestrator,
            minter,
            exchange,
            content,
            root,
            _temp_dir: temp_dir,
        }
    }

    /// Write a template file into the template root.
    pub fn template(&self, name: &str) -> PathBuf {
        let path = self.root.join("templates").join(name);
        std::fs::write(&path, b"template").expect("write template");
        path
    }

    /// Directory job working directories are created in.
    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    /// Names of the working directories currently on disk.
    pub fn working_dirs(&self) -> Vec<String> {
        match std::fs::read_dir(self.jobs_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Call a function.
    pub async fn call(&self, ctx: &CallContext, function_id: i32, params: &[&str]) -> OnDemandResult {
        let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        self.dispatcher.dispatch(ctx, function_id, &params).await
    }

    /// Poll STATUS until `done` accepts the result or `timeout` elapses.
    pub async fn poll_status(
        &self,
        ctx: &CallContext,
        timeout: Duration,
        done: impl Fn(&OnDemandResult) -> bool,
    ) -> OnDemandResult {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let result = self.call(ctx, 2, &[]).await;
            if done(&result) || tokio::time::Instant::now() >= deadline {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Call context for `CORP\<user>`.
pub fn caller(user: &str) -> CallContext {
    CallContext {
        identity: UserIdentity::new("CORP", user),
        app_id: Some("app-1".to_string()),
    }
}
