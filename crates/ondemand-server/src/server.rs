// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP transport.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /functions/execute` | Run one function call |
//! | `GET /capabilities` | Describe the callable functions |
//! | `GET /health` | Version, uptime and backing server reachability |
//!
//! Only missing or malformed call metadata is rejected at the transport
//! level; every other failure is a `-1` result inside a `200` response.

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::CACHE_CONTROL;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ondemand_core::dispatcher::{self, Capabilities};
use ondemand_core::{FunctionDispatcher, OnDemandResult};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityStatus;
use crate::wire::{BundledRows, CallMetadata, HeaderError};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    dispatcher: FunctionDispatcher,
    connectivity: watch::Receiver<ConnectivityStatus>,
    started_at: Instant,
}

impl AppState {
    /// Create handler state.
    pub fn new(
        dispatcher: FunctionDispatcher,
        connectivity: watch::Receiver<ConnectivityStatus>,
    ) -> Self {
        Self {
            dispatcher,
            connectivity,
            started_at: Instant::now(),
        }
    }

    /// The dispatcher calls are routed to.
    pub fn dispatcher(&self) -> &FunctionDispatcher {
        &self.dispatcher
    }
}

/// Health report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Connector version.
    pub version: &'static str,
    /// Seconds since the handlers were created.
    pub uptime_secs: u64,
    /// Jobs being watched.
    pub active_jobs: usize,
    /// Cached caller sessions.
    pub sessions: usize,
    /// Latest reachability observation.
    pub connectivity: ConnectivityStatus,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/functions/execute", post(execute))
        .route("/capabilities", get(capabilities))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?addr, "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HeaderError> {
    let meta = match CallMetadata::from_headers(&headers) {
        Ok(meta) => meta,
        Err(e) => {
            warn!(error = %e, "Rejected call with invalid metadata");
            return Err(e);
        }
    };

    let result = match BundledRows::from_body(&body) {
        Ok(rows) => {
            let params = rows.parameters();
            debug!(
                function_id = meta.function_id,
                identity = %meta.context.identity,
                params = params.len(),
                "Executing function"
            );
            state
                .dispatcher
                .dispatch(&meta.context, meta.function_id, &params)
                .await
        }
        Err(e) => {
            warn!(error = %e, "Malformed request body");
            OnDemandResult::failed(format!("malformed request body: {}", e))
        }
    };

    debug!(
        function_id = meta.function_id,
        identity = %meta.context.identity,
        status = result.status,
        "Function completed"
    );

    Ok((
        [(CACHE_CONTROL, "no-store")],
        Json(BundledRows::from_result(&result)),
    ))
}

async fn capabilities() -> Json<Capabilities> {
    Json(dispatcher::capabilities())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let orchestrator = state.dispatcher.orchestrator();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_jobs: orchestrator.active_watchers(),
        sessions: orchestrator.sessions().len(),
        connectivity: state.connectivity.borrow().clone(),
    })
}
