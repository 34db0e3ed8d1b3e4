// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared-content repository.
//!
//! Finished reports are published as named shared content owned by the
//! caller. Publishing is an upsert keyed by `(owner, name)`: the first
//! report creates the entry, later reports replace its file in place.

pub mod memory;
pub mod qrs;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Credential;
use crate::identity::{Endpoint, UserIdentity};

pub use memory::MemoryContentRepository;
pub use qrs::QrsContentRepository;

/// Errors talking to the repository.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The artifact could not be read.
    #[error("failed to read artifact {path}: {source}")]
    Io {
        /// Artifact path.
        path: String,
        /// Underlying failure.
        source: std::io::Error,
    },

    /// Transport-level failure.
    #[error("request to {url} failed: {reason}")]
    Http {
        /// Request URL.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// The repository answered with an error status.
    #[error("request to {url} returned HTTP {status}: {body}")]
    Status {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The repository answered with an unexpected payload.
    #[error("unexpected response from {url}: {reason}")]
    Decode {
        /// Request URL.
        url: String,
        /// Underlying failure.
        reason: String,
    },
}

/// Owner of a shared-content entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentOwner {
    /// User id.
    #[serde(default)]
    pub user_id: String,
    /// User directory.
    #[serde(default)]
    pub user_directory: String,
}

/// A file attached to a shared-content entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentReference {
    /// Server-relative path the file is downloadable from.
    #[serde(default)]
    pub external_path: String,
}

/// A shared-content entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedContent {
    /// Repository id.
    pub id: String,
    /// Entry name.
    pub name: String,
    /// Owner, when the repository reports one.
    #[serde(default)]
    pub owner: Option<ContentOwner>,
    /// Attached files.
    #[serde(default)]
    pub references: Vec<ContentReference>,
}

impl SharedContent {
    /// Whether the entry belongs to `identity` (case-insensitive).
    pub fn owned_by(&self, identity: &UserIdentity) -> bool {
        self.owner.as_ref().is_some_and(|owner| {
            owner.user_id.eq_ignore_ascii_case(&identity.id)
                && owner.user_directory.eq_ignore_ascii_case(&identity.directory)
        })
    }
}

/// Who is talking to the repository and where.
#[derive(Debug, Clone)]
pub struct ContentContext {
    /// Backing server; download links are rooted here.
    pub endpoint: Endpoint,
    /// Repository base URL (endpoint plus virtual proxy path).
    pub base_uri: String,
    /// Session credential of the caller.
    pub credential: Credential,
    /// Caller owning the content.
    pub identity: UserIdentity,
}

/// File payload to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUpload {
    /// File name, used as the external path.
    pub file_name: String,
    /// MIME type, `application/<ext>`.
    pub content_type: String,
    /// File contents.
    pub data: Vec<u8>,
}

impl ContentUpload {
    /// Read an artifact from disk.
    pub async fn from_file(path: &Path) -> Result<Self, UploadError> {
        let data = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Ok(Self {
            file_name,
            content_type: format!("application/{}", extension),
            data,
        })
    }
}

/// Owner-scoped store of named artifacts.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Entries named `name` visible to the caller.
    async fn list(&self, ctx: &ContentContext, name: &str) -> Result<Vec<SharedContent>, UploadError>;

    /// Create an entry owned by the caller and attach `upload`.
    async fn create(
        &self,
        ctx: &ContentContext,
        name: &str,
        description: &str,
        upload: ContentUpload,
    ) -> Result<SharedContent, UploadError>;

    /// Replace the file attached to `existing`.
    async fn update(
        &self,
        ctx: &ContentContext,
        existing: &SharedContent,
        upload: ContentUpload,
    ) -> Result<SharedContent, UploadError>;
}

/// Result of [`publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A new entry was created.
    Created(SharedContent),
    /// An existing entry was updated in place.
    Updated(SharedContent),
}

/// Description attached to entries created by the connector.
pub const CONTENT_DESCRIPTION: &str = "Created by the on-demand report connector.";

/// First entry named `name` owned by the caller.
pub async fn find_owned(
    repo: &dyn ContentRepository,
    ctx: &ContentContext,
    name: &str,
) -> Result<Option<SharedContent>, UploadError> {
    Ok(repo
        .list(ctx, name)
        .await?
        .into_iter()
        .find(|entry| entry.owned_by(&ctx.identity)))
}

/// Create or update the caller's entry named `name`.
pub async fn publish(
    repo: &dyn ContentRepository,
    ctx: &ContentContext,
    name: &str,
    upload: ContentUpload,
) -> Result<PublishOutcome, UploadError> {
    match find_owned(repo, ctx, name).await? {
        Some(existing) => Ok(PublishOutcome::Updated(
            repo.update(ctx, &existing, upload).await?,
        )),
        None => Ok(PublishOutcome::Created(
            repo.create(ctx, name, CONTENT_DESCRIPTION, upload).await?,
        )),
    }
}

/// Download link of the caller's entry named `name`, if it has a file.
pub async fn resolve_link(
    repo: &dyn ContentRepository,
    ctx: &ContentContext,
    name: &str,
) -> Result<Option<String>, UploadError> {
    Ok(find_owned(repo, ctx, name).await?.and_then(|entry| {
        entry
            .references
            .first()
            .map(|reference| format!("{}{}", ctx.endpoint, reference.external_path))
    }))
}
