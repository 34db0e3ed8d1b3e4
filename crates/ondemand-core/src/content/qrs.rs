// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared-content client for the repository service REST API.
//!
//! Every request carries the caller's session cookie and a cross-site
//! request forgery key, sent both as the `xrfkey` query parameter and the
//! `X-Qlik-Xrfkey` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{ContentContext, ContentRepository, ContentUpload, SharedContent, UploadError};

const XRF_HEADER: &str = "X-Qlik-Xrfkey";
const CONTENT_TYPE_NAME: &str = "Qlik report";

/// Repository client over HTTP.
#[derive(Debug, Clone)]
pub struct QrsContentRepository {
    client: reqwest::Client,
}

impl QrsContentRepository {
    /// Create a client.
    pub fn new(timeout: Duration, skip_cert_verification: bool) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(skip_cert_verification)
            .build()
            .map_err(|e| UploadError::Http {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    /// Create a repository around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request(
        &self,
        method: reqwest::Method,
        ctx: &ContentContext,
        path: &str,
        query: &[(&str, &str)],
    ) -> (String, reqwest::RequestBuilder) {
        let url = format!("{}/qrs/{}", ctx.base_uri.trim_end_matches('/'), path);
        let key = xrf_key();
        let builder = self
            .client
            .request(method, &url)
            .query(query)
            .query(&[("xrfkey", key.as_str())])
            .header(XRF_HEADER, key.as_str())
            .header(COOKIE, ctx.credential.cookie_header());
        (url, builder)
    }

    async fn send<T: DeserializeOwned>(
        url: String,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, UploadError> {
        let response = builder.send().await.map_err(|e| UploadError::Http {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        response.json::<T>().await.map_err(|e| UploadError::Decode {
            url,
            reason: e.to_string(),
        })
    }

    async fn upload_file(
        &self,
        ctx: &ContentContext,
        id: &str,
        upload: ContentUpload,
    ) -> Result<(), UploadError> {
        let (url, builder) = self.request(
            reqwest::Method::POST,
            ctx,
            &format!("sharedcontent/{}/uploadfile", id),
            &[("externalpath", upload.file_name.as_str())],
        );
        let response = builder
            .header(CONTENT_TYPE, upload.content_type)
            .body(upload.data)
            .send()
            .await
            .map_err(|e| UploadError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        debug!(content_id = %id, "Uploaded shared content file");
        Ok(())
    }

    async fn fetch(&self, ctx: &ContentContext, id: &str) -> Result<SharedContent, UploadError> {
        let (url, builder) =
            self.request(reqwest::Method::GET, ctx, &format!("sharedcontent/{}", id), &[]);
        Self::send(url, builder).await
    }
}

/// 16 alphanumeric characters.
fn xrf_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Escape a value for a single-quoted filter literal.
fn filter_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[async_trait]
impl ContentRepository for QrsContentRepository {
    async fn list(&self, ctx: &ContentContext, name: &str) -> Result<Vec<SharedContent>, UploadError> {
        let filter = format!("name eq '{}'", filter_literal(name));
        let (url, builder) = self.request(
            reqwest::Method::GET,
            ctx,
            "sharedcontent/full",
            &[("filter", filter.as_str())],
        );
        Self::send(url, builder).await
    }

    async fn create(
        &self,
        ctx: &ContentContext,
        name: &str,
        description: &str,
        upload: ContentUpload,
    ) -> Result<SharedContent, UploadError> {
        let (url, builder) = self.request(reqwest::Method::POST, ctx, "sharedcontent", &[]);
        let created: SharedContent = Self::send(
            url,
            builder.json(&json!({
                "name": name,
                "type": CONTENT_TYPE_NAME,
                "description": description,
            })),
        )
        .await?;

        self.upload_file(ctx, &created.id, upload).await?;
        self.fetch(ctx, &created.id).await
    }

    async fn update(
        &self,
        ctx: &ContentContext,
        existing: &SharedContent,
        upload: ContentUpload,
    ) -> Result<SharedContent, UploadError> {
        self.upload_file(ctx, &existing.id, upload).await?;
        self.fetch(ctx, &existing.id).await
    }
}
