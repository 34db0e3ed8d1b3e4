// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authentication capabilities used by the session cache.
//!
//! Acquiring a session is a two step exchange:
//!
//! 1. A [`TokenMinter`] issues a short-lived bearer token for the caller.
//! 2. A [`SessionExchange`] presents that token to the backing server and
//!    receives a session cookie in return.
//!
//! The cookie is the [`Credential`] cached per caller and handed to the
//! renderer and the shared-content repository.

pub mod exchange;
pub mod jwt;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{Endpoint, UserIdentity};

pub use exchange::HttpSessionExchange;
pub use jwt::JwtTokenMinter;
pub use mock::{MockSessionExchange, MockTokenMinter};

/// Default validity of a minted bearer token.
pub const DEFAULT_TOKEN_VALIDITY: Duration = Duration::from_secs(20 * 60);

/// Default name of the session cookie issued by the backing server.
pub const DEFAULT_COOKIE_NAME: &str = "X-Qlik-Session";

/// Errors raised while minting a token or exchanging it for a session.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The signing key could not be loaded.
    #[error("signing key error: {0}")]
    Key(String),

    /// Token minting failed.
    #[error("failed to mint token for {identity}: {reason}")]
    Mint {
        /// Identity the token was minted for.
        identity: String,
        /// Underlying failure.
        reason: String,
    },

    /// The login round trip failed at the transport level.
    #[error("login request to {url} failed: {reason}")]
    Exchange {
        /// URL of the login request.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// The backing server rejected the login.
    #[error("login to {url} rejected with HTTP {status}")]
    Rejected {
        /// URL of the login request.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The login succeeded but no session cookie was issued.
    #[error("no '{cookie}' cookie returned by {url}")]
    CookieMissing {
        /// Expected cookie name.
        cookie: String,
        /// URL of the login request.
        url: String,
    },
}

/// Virtual proxy the session is established through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Path prefix of the virtual proxy (may be empty).
    pub path: String,
    /// Name of the session cookie issued by the proxy.
    pub cookie_name: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
        }
    }
}

/// Opaque session credential (a named cookie).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
}

impl Credential {
    /// Render the credential as a `Cookie` request header value.
    pub fn cookie_header(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Issues bearer tokens for a caller identity.
pub trait TokenMinter: Send + Sync {
    /// Mint a token for `identity` valid for `validity`.
    fn mint(&self, identity: &UserIdentity, validity: Duration) -> Result<String, AuthError>;
}

/// Exchanges a bearer token for a session credential.
#[async_trait]
pub trait SessionExchange: Send + Sync {
    /// Perform the login round trip against `endpoint` through `proxy`.
    async fn login(
        &self,
        endpoint: &Endpoint,
        proxy: &ProxyConfig,
        token: &str,
    ) -> Result<Credential, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header() {
        let credential = Credential {
            name: "X-Qlik-Session".to_string(),
            value: "abc123".to_string(),
        };
        assert_eq!(credential.cookie_header(), "X-Qlik-Session=abc123");
    }

    #[test]
    fn test_proxy_default_cookie_name() {
        let proxy = ProxyConfig::default();
        assert_eq!(proxy.cookie_name, DEFAULT_COOKIE_NAME);
        assert!(proxy.path.is_empty());
    }
}
