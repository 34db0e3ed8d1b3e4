// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! On-demand report connector core.
//!
//! Turns a stream of independent, stateless function calls into one report
//! workflow per caller: authenticate once, start a background render, poll
//! its progress, fetch or invalidate its result, reclaim resources.
//!
//! ```text
//!  call ──► FunctionDispatcher ──► JobOrchestrator ──► Renderer (detached)
//!                │                      │                   │
//!                ▼                      ▼                   ▼ JobResults/*.json
//!           SessionCache ◄──────── JobWatcher ◄──────── StatusSource
//!                ▲                      │
//!                │ download link        ▼
//!                └──────────────── ContentRepository
//! ```
//!
//! External collaborators sit behind traits so the core runs against
//! in-memory doubles in tests:
//!
//! | Capability | Trait | Production | Test double |
//! |------------|-------|------------|-------------|
//! | Token minting | [`auth::TokenMinter`] | [`auth::JwtTokenMinter`] | [`auth::MockTokenMinter`] |
//! | Login exchange | [`auth::SessionExchange`] | [`auth::HttpSessionExchange`] | [`auth::MockSessionExchange`] |
//! | Rendering | [`renderer::Renderer`] | [`renderer::ProcessRenderer`] | [`renderer::MockRenderer`] |
//! | Progress | [`status_source::StatusSource`] | [`status_source::FileStatusSource`] | same |
//! | Publishing | [`content::ContentRepository`] | [`content::QrsContentRepository`] | [`content::MemoryContentRepository`] |

#![deny(missing_docs)]

/// Token minting and session login.
pub mod auth;
/// Shared-content repository.
pub mod content;
/// Function dispatch and result encoding.
pub mod dispatcher;
/// Crate-level error.
pub mod error;
/// Caller identity and backing server endpoint.
pub mod identity;
/// Job records and store.
pub mod job;
/// Job creation and abort.
pub mod orchestrator;
/// Render job configuration.
pub mod render_config;
/// Renderer backends.
pub mod renderer;
/// Session affinity cache.
pub mod session;
/// Render progress sources.
pub mod status_source;
/// Background job watcher.
pub mod watcher;

pub use dispatcher::{CallContext, FunctionDispatcher, FunctionId, OnDemandResult};
pub use error::{Error, Result};
pub use identity::{Endpoint, UserIdentity};
pub use job::{JobId, JobStatus, JobStore};
pub use orchestrator::{JobHandle, JobOrchestrator, JobSpec, OrchestratorConfig};
pub use session::{SessionCache, SessionCacheConfig};
