// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory shared-content repository for testing.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{
    ContentContext, ContentOwner, ContentReference, ContentRepository, ContentUpload,
    SharedContent, UploadError,
};

#[derive(Debug, Clone)]
struct StoredContent {
    content: SharedContent,
    data: Vec<u8>,
}

/// Repository keeping entries in memory.
#[derive(Debug, Default)]
pub struct MemoryContentRepository {
    entries: Mutex<Vec<StoredContent>>,
    next_id: AtomicUsize,
    uploads: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryContentRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<SharedContent> {
        self.lock().iter().map(|stored| stored.content.clone()).collect()
    }

    /// Contents of the first entry named `name`.
    pub fn data_of(&self, name: &str) -> Option<Vec<u8>> {
        self.lock()
            .iter()
            .find(|stored| stored.content.name == name)
            .map(|stored| stored.data.clone())
    }

    /// Number of file uploads performed.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StoredContent>> {
        // A poisoned lock only means a test panicked mid-update.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, operation: &str) -> Result<(), UploadError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(UploadError::Status {
                url: format!("memory://{}", operation),
                status: 500,
                body: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}

fn external_path(id: &str, file_name: &str) -> String {
    format!("/sharedcontent/{}/{}", id, file_name)
}

#[async_trait]
impl ContentRepository for MemoryContentRepository {
    async fn list(&self, _ctx: &ContentContext, name: &str) -> Result<Vec<SharedContent>, UploadError> {
        self.check("list")?;
        Ok(self
            .lock()
            .iter()
            .filter(|stored| stored.content.name == name)
            .map(|stored| stored.content.clone())
            .collect())
    }

    async fn create(
        &self,
        ctx: &ContentContext,
        name: &str,
        _description: &str,
        upload: ContentUpload,
    ) -> Result<SharedContent, UploadError> {
        self.check("create")?;
        let id = format!("content-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let content = SharedContent {
            id: id.clone(),
            name: name.to_string(),
            owner: Some(ContentOwner {
                user_id: ctx.identity.id.clone(),
                user_directory: ctx.identity.directory.clone(),
            }),
            references: vec![ContentReference {
                external_path: external_path(&id, &upload.file_name),
            }],
        };
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.lock().push(StoredContent {
            content: content.clone(),
            data: upload.data,
        });
        Ok(content)
    }

    async fn update(
        &self,
        _ctx: &ContentContext,
        existing: &SharedContent,
        upload: ContentUpload,
    ) -> Result<SharedContent, UploadError> {
        self.check("update")?;
        let mut entries = self.lock();
        let stored = entries
            .iter_mut()
            .find(|stored| stored.content.id == existing.id)
            .ok_or_else(|| UploadError::Status {
                url: format!("memory://sharedcontent/{}", existing.id),
                status: 404,
                body: "not found".to_string(),
            })?;
        stored.content.references = vec![ContentReference {
            external_path: external_path(&existing.id, &upload.file_name),
        }];
        stored.data = upload.data;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(stored.content.clone())
    }
}
