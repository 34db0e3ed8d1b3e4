// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock authentication capabilities for testing.
//!
//! Both mocks count their invocations so tests can assert how many tokens
//! were minted and how many login round trips happened.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{AuthError, Credential, ProxyConfig, SessionExchange, TokenMinter};
use crate::identity::{Endpoint, UserIdentity};

/// Token minter returning predictable tokens.
#[derive(Debug, Default)]
pub struct MockTokenMinter {
    mints: AtomicUsize,
    /// If true, every mint fails.
    pub fail: AtomicBool,
}

impl MockTokenMinter {
    /// Create a new mock minter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a minter that always fails.
    pub fn failing() -> Self {
        Self {
            mints: AtomicUsize::new(0),
            fail: AtomicBool::new(true),
        }
    }

    /// Number of tokens minted so far (failed attempts included).
    pub fn mint_count(&self) -> usize {
        self.mints.load(Ordering::SeqCst)
    }
}

impl TokenMinter for MockTokenMinter {
    fn mint(&self, identity: &UserIdentity, validity: Duration) -> Result<String, AuthError> {
        let n = self.mints.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::Mint {
                identity: identity.to_string(),
                reason: "mock failure".to_string(),
            });
        }
        Ok(format!("token-{}-{}-{}", identity.id, validity.as_secs(), n))
    }
}

/// Session exchange that hands out sequential cookies without any network.
#[derive(Debug, Clone, Default)]
pub struct MockSessionExchange {
    logins: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    /// Simulated latency of each login round trip.
    pub delay: Duration,
}

impl MockSessionExchange {
    /// Create a new mock exchange.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an exchange whose logins take `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Make subsequent logins fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of login round trips so far.
    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionExchange for MockSessionExchange {
    async fn login(
        &self,
        endpoint: &Endpoint,
        proxy: &ProxyConfig,
        token: &str,
    ) -> Result<Credential, AuthError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) || token.is_empty() {
            return Err(AuthError::Rejected {
                url: endpoint.join(&[&proxy.path]),
                status: 403,
            });
        }
        Ok(Credential {
            name: proxy.cookie_name.clone(),
            value: format!("session-{}", n),
        })
    }
}
