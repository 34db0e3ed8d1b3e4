// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP login exchange: bearer token in, session cookie out.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use tracing::debug;

use super::{AuthError, Credential, ProxyConfig, SessionExchange};
use crate::identity::Endpoint;

/// Path requested through the proxy to trigger session creation.
const LOGIN_PATH: &str = "sense/app";

/// Performs the login round trip with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSessionExchange {
    client: reqwest::Client,
}

impl HttpSessionExchange {
    /// Create an exchange with its own HTTP client.
    pub fn new(timeout: Duration, skip_cert_verification: bool) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(skip_cert_verification)
            .build()
            .map_err(|e| AuthError::Exchange {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    /// Create an exchange around an existing client.
    ///
    /// The client must not follow redirects, or the session cookie set on the
    /// redirect response is lost.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionExchange for HttpSessionExchange {
    async fn login(
        &self,
        endpoint: &Endpoint,
        proxy: &ProxyConfig,
        token: &str,
    ) -> Result<Credential, AuthError> {
        let url = endpoint.join(&[&proxy.path, LOGIN_PATH]);

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| AuthError::Exchange {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        // Redirects after a successful login still carry the cookie.
        if status.is_client_error() || status.is_server_error() {
            return Err(AuthError::Rejected {
                url,
                status: status.as_u16(),
            });
        }

        let cookie = response
            .cookies()
            .filter(|cookie| cookie.name() == proxy.cookie_name)
            .map(|cookie| cookie.value().trim_matches('"').to_string())
            .find(|value| !value.is_empty());

        match cookie {
            Some(value) => {
                debug!(url = %url, cookie = %proxy.cookie_name, "Session cookie received");
                Ok(Credential {
                    name: proxy.cookie_name.clone(),
                    value,
                })
            }
            None => Err(AuthError::CookieMissing {
                cookie: proxy.cookie_name.clone(),
                url,
            }),
        }
    }
}
