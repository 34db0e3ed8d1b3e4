// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! On-demand report connector binary.

use std::sync::Arc;
use std::time::Duration;

use ondemand_core::auth::HttpSessionExchange;
use ondemand_core::content::QrsContentRepository;
use ondemand_core::renderer::ProcessRenderer;
use ondemand_core::renderer::process::ProcessRendererConfig;
use ondemand_core::status_source::FileStatusSource;
use ondemand_core::{FunctionDispatcher, JobOrchestrator, JobStore, SessionCache};
use ondemand_server::{Config, ConnectivityCheckerConfig, ConnectorRuntime};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);
const CONTENT_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ondemand_server=info,ondemand_core=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("Could not load .env file: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        server_uri = %config.server_uri,
        bind_addr = %config.bind_addr,
        work_dir = %config.work_dir.display(),
        renderer = %config.renderer_path.display(),
        fallbacks = config.fallback_uris.len(),
        "Starting on-demand connector"
    );

    let minter = config.signing_key.minter()?;
    let exchange = HttpSessionExchange::new(LOGIN_TIMEOUT, config.skip_cert_verification)?;
    let sessions = Arc::new(SessionCache::new(
        Arc::new(minter),
        Arc::new(exchange),
        config.session_cache_config(),
    ));

    let renderer = ProcessRenderer::new(ProcessRendererConfig {
        executable: config.renderer_path.clone(),
        ..Default::default()
    });
    let content = QrsContentRepository::new(CONTENT_TIMEOUT, config.skip_cert_verification)?;

    let orchestrator = JobOrchestrator::new(
        config.orchestrator_config(),
        sessions,
        Arc::new(JobStore::new()),
        Arc::new(renderer),
        Arc::new(FileStatusSource::new()),
        Arc::new(content),
    );

    let mut connectivity = ConnectivityCheckerConfig::new(config.server_uri.clone());
    connectivity.fallbacks = config.fallback_uris.clone();
    connectivity.proxy_path = config.proxy.path.clone();
    connectivity.skip_cert_verification = config.skip_cert_verification;

    let runtime = ConnectorRuntime::builder()
        .dispatcher(FunctionDispatcher::new(orchestrator))
        .bind_addr(config.bind_addr)
        .connectivity(connectivity)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Connector ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("On-demand connector shut down");

    Ok(())
}
