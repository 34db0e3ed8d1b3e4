// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable connector runtime.
//!
//! ```ignore
//! let runtime = ConnectorRuntime::builder()
//!     .dispatcher(dispatcher)
//!     .bind_addr("127.0.0.1:50059".parse()?)
//!     .connectivity(ConnectivityCheckerConfig::new(endpoint))
//!     .build()?
//!     .start()
//!     .await?;
//!
//! runtime.shutdown().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use ondemand_core::FunctionDispatcher;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::connectivity::{ConnectivityChecker, ConnectivityCheckerConfig, ConnectivityStatus};
use crate::maintenance::{MaintenanceWorker, MaintenanceWorkerConfig};
use crate::server::{self, AppState};

/// Builder for [`ConnectorRuntime`].
pub struct ConnectorRuntimeBuilder {
    dispatcher: Option<FunctionDispatcher>,
    bind_addr: SocketAddr,
    connectivity: Option<ConnectivityCheckerConfig>,
    maintenance: MaintenanceWorkerConfig,
}

impl Default for ConnectorRuntimeBuilder {
    fn default() -> Self {
        Self {
            dispatcher: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 50059)),
            connectivity: None,
            maintenance: MaintenanceWorkerConfig::default(),
        }
    }
}

impl ConnectorRuntimeBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher serving function calls (required).
    pub fn dispatcher(mut self, dispatcher: FunctionDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// HTTP listen address. Port `0` picks a free port.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Enable the connectivity checker.
    pub fn connectivity(mut self, config: ConnectivityCheckerConfig) -> Self {
        self.connectivity = Some(config);
        self
    }

    /// Maintenance worker settings.
    pub fn maintenance(mut self, config: MaintenanceWorkerConfig) -> Self {
        self.maintenance = config;
        self
    }

    /// Validate the settings.
    pub fn build(self) -> Result<ConnectorRuntimeConfig> {
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| anyhow::anyhow!("dispatcher is required"))?;

        Ok(ConnectorRuntimeConfig {
            dispatcher,
            bind_addr: self.bind_addr,
            connectivity: self.connectivity,
            maintenance: self.maintenance,
        })
    }
}

/// Validated runtime settings, ready to start.
pub struct ConnectorRuntimeConfig {
    dispatcher: FunctionDispatcher,
    bind_addr: SocketAddr,
    connectivity: Option<ConnectivityCheckerConfig>,
    maintenance: MaintenanceWorkerConfig,
}

impl ConnectorRuntimeConfig {
    /// Bind the listener and start the server and background workers.
    pub async fn start(self) -> Result<ConnectorRuntime> {
        let (connectivity_rx, connectivity) = match self.connectivity {
            Some(config) => {
                let checker = ConnectivityChecker::new(config)
                    .context("failed to create connectivity checker")?;
                let rx = checker.subscribe();
                let shutdown = checker.shutdown_handle();
                let handle = tokio::spawn(async move {
                    checker.run().await;
                });
                (rx, Some((shutdown, handle)))
            }
            None => {
                debug!("Connectivity checker not configured");
                let (_, rx) = watch::channel(ConnectivityStatus::default());
                (rx, None)
            }
        };

        let maintenance_worker =
            MaintenanceWorker::new(self.dispatcher.orchestrator().clone(), self.maintenance);
        let maintenance_shutdown = maintenance_worker.shutdown_handle();
        let maintenance_handle = tokio::spawn(async move {
            maintenance_worker.run().await;
        });

        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.bind_addr))?;
        let local_addr = listener.local_addr()?;

        let router = server::router(AppState::new(self.dispatcher, connectivity_rx));
        let server_shutdown = Arc::new(Notify::new());
        let signal = server_shutdown.clone();
        let server_handle = tokio::spawn(server::serve(listener, router, async move {
            signal.notified().await;
        }));

        info!(
            bind_addr = %local_addr,
            connectivity = connectivity.is_some(),
            "ConnectorRuntime started"
        );

        Ok(ConnectorRuntime {
            server_handle,
            maintenance_handle,
            connectivity,
            server_shutdown,
            maintenance_shutdown,
            local_addr,
        })
    }
}

/// A running connector that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ConnectorRuntime {
    server_handle: JoinHandle<std::io::Result<()>>,
    maintenance_handle: JoinHandle<()>,
    connectivity: Option<(Arc<Notify>, JoinHandle<()>)>,
    server_shutdown: Arc<Notify>,
    maintenance_shutdown: Arc<Notify>,
    local_addr: SocketAddr,
}

impl ConnectorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ConnectorRuntimeBuilder {
        ConnectorRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting requests, waits for in-flight ones, then stops the
    /// background workers. Running jobs are left to their watchers.
    pub async fn shutdown(self) -> Result<()> {
        info!("ConnectorRuntime shutting down...");

        self.server_shutdown.notify_one();
        self.maintenance_shutdown.notify_one();
        if let Some((shutdown, _)) = &self.connectivity {
            shutdown.notify_one();
        }

        if let Err(e) = self.maintenance_handle.await {
            error!("Maintenance worker task panicked: {}", e);
        }

        if let Some((_, handle)) = self.connectivity
            && let Err(e) = handle.await
        {
            error!("Connectivity checker task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("ConnectorRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("HTTP server error during shutdown: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("HTTP server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }
}
