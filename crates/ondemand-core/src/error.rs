// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ondemand-core.

use thiserror::Error;

/// Crate-level error, for embedders wiring the components together.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Identity or endpoint parsing failed.
    #[error("Identity error: {0}")]
    Identity(#[from] crate::identity::IdentityError),

    /// Authentication capability failed.
    #[error("Authentication error: {0}")]
    Auth(#[from] crate::auth::AuthError),

    /// Job store operation failed.
    #[error("Job store error: {0}")]
    JobStore(#[from] crate::job::JobStoreError),

    /// Job creation failed.
    #[error("Job creation error: {0}")]
    JobCreation(#[from] crate::orchestrator::JobCreationError),

    /// Renderer operation failed.
    #[error("Renderer error: {0}")]
    Renderer(#[from] crate::renderer::RendererError),

    /// Shared-content repository operation failed.
    #[error("Upload error: {0}")]
    Upload(#[from] crate::content::UploadError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
