// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for ondemand-server integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use ondemand_core::auth::{MockSessionExchange, MockTokenMinter};
use ondemand_core::content::MemoryContentRepository;
use ondemand_core::renderer::MockRenderer;
use ondemand_core::status_source::FileStatusSource;
use ondemand_core::{
    Endpoint, FunctionDispatcher, JobOrchestrator, JobStore, OnDemandResult, OrchestratorConfig,
    SessionCache, SessionCacheConfig,
};
use ondemand_server::connectivity::ConnectivityStatus;
use ondemand_server::wire::{BundledRows, HEADER_APP_ID, HEADER_FUNCTION_ID, HEADER_USER_ID};
use ondemand_server::{AppState, router};
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

pub const ENDPOINT: &str = "https://sense.example.com";
pub const USER: &str = "UserDirectory=CORP; UserId=jdoe";

/// Router wired to mock collaborators in a temporary directory.
pub struct TestServer {
    pub dispatcher: FunctionDispatcher,
    pub content: Arc<MemoryContentRepository>,
    pub connectivity: watch::Sender<ConnectivityStatus>,
    pub root: PathBuf,
    router: Router,
    _temp_dir: tempfile::TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let root = temp_dir.path().to_path_buf();

        let mut config = OrchestratorConfig::new(Endpoint::parse(ENDPOINT).expect("endpoint"));
        config.working_dir_root = root.join("jobs");
        config.template_root = root.join("templates");
        config.poll_interval = Duration::from_millis(10);
        config.publish_settle_delay = Duration::from_millis(5);
        config.job_timeout = None;

        let content = Arc::new(MemoryContentRepository::new());
        let sessions = Arc::new(SessionCache::new(
            Arc::new(MockTokenMinter::new()),
            Arc::new(MockSessionExchange::new()),
            SessionCacheConfig::default(),
        ));
        let orchestrator = JobOrchestrator::new(
            config,
            sessions,
            Arc::new(JobStore::new()),
            Arc::new(MockRenderer::new()),
            Arc::new(FileStatusSource::new()),
            content.clone(),
        );
        let dispatcher = FunctionDispatcher::new(orchestrator);

        std::fs::create_dir_all(root.join("templates")).expect("templates dir");
        std::fs::write(root.join("templates").join("Sales.xlsx"), b"template")
            .expect("write template");

        let (connectivity, rx) = watch::channel(ConnectivityStatus::default());
        let router = router(AppState::new(dispatcher.clone(), rx));

        Self {
            dispatcher,
            content,
            connectivity,
            root,
            router,
            _temp_dir: temp_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("router call")
    }

    /// POST a function call with the given parameters.
    pub async fn execute(&self, function_id: i32, params: &[&str]) -> Response<Body> {
        let body = serde_json::json!({
            "rows": [{ "duals": params.iter().map(|p| serde_json::json!({"strData": p})).collect::<Vec<_>>() }]
        });
        let request = Request::post("/functions/execute")
            .header(HEADER_FUNCTION_ID, function_id.to_string())
            .header(HEADER_USER_ID, USER)
            .header(HEADER_APP_ID, "app-1")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        self.send(request).await
    }

    /// POST a function call and decode the result.
    pub async fn call(&self, function_id: i32, params: &[&str]) -> OnDemandResult {
        result_of(self.execute(function_id, params).await).await
    }

    /// Poll STATUS until `done` accepts the result or `timeout` elapses.
    pub async fn poll_status(
        &self,
        timeout: Duration,
        done: impl Fn(&OnDemandResult) -> bool,
    ) -> OnDemandResult {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let result = self.call(2, &[]).await;
            if done(&result) || tokio::time::Instant::now() >= deadline {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

pub async fn json_of(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// Decode the single-dual result envelope.
pub async fn result_of(response: Response<Body>) -> OnDemandResult {
    let rows: BundledRows =
        serde_json::from_slice(&body_bytes(response).await).expect("bundled rows");
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0].duals.len(), 1);
    serde_json::from_str(&rows.rows[0].duals[0].str_data).expect("result json")
}
