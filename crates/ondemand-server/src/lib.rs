// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP connector for on-demand reports.
//!
//! Wraps an [`ondemand_core::FunctionDispatcher`] in an axum server and runs
//! the background workers a long-lived connector needs:
//!
//! ```text
//!   POST /functions/execute ──► FunctionDispatcher ──► JobOrchestrator
//!   GET  /capabilities                                    │
//!   GET  /health ◄── ConnectivityChecker          MaintenanceWorker
//! ```

#![deny(missing_docs)]

/// Environment configuration.
pub mod config;
/// Backing server reachability checks.
pub mod connectivity;
/// Session eviction, job pruning and orphan cleanup.
pub mod maintenance;
/// Embeddable runtime.
pub mod runtime;
/// axum router and handlers.
pub mod server;
/// Request and response body shapes.
pub mod wire;

pub use config::{Config, ConfigError, SigningKey};
pub use connectivity::{ConnectivityChecker, ConnectivityCheckerConfig, ConnectivityStatus};
pub use maintenance::{MaintenanceWorker, MaintenanceWorkerConfig};
pub use runtime::{ConnectorRuntime, ConnectorRuntimeBuilder};
pub use server::{AppState, router};
