// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session affinity cache.
//!
//! Maps `(endpoint, identity)` to an authenticated [`Session`]. The cache is
//! the single source of truth for whether a caller is authenticated; callers
//! never see the credential itself.
//!
//! Creation is linearized per key: the map stores an async once-cell per key,
//! so concurrent first calls for the same caller share one mint and one login
//! round trip while different callers proceed independently.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::auth::{
    AuthError, Credential, DEFAULT_TOKEN_VALIDITY, ProxyConfig, SessionExchange, TokenMinter,
};
use crate::identity::{Endpoint, UserIdentity};
use crate::job::JobId;

/// Cache key: one session per caller per backing server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Backing server.
    pub endpoint: Endpoint,
    /// Caller.
    pub identity: UserIdentity,
}

impl SessionKey {
    /// Create a key.
    pub fn new(endpoint: Endpoint, identity: UserIdentity) -> Self {
        Self { endpoint, identity }
    }
}

/// Mutable part of a session, always read and written as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Job most recently started for this caller.
    pub job_id: Option<JobId>,
    /// Pid of that job's renderer.
    pub process_id: Option<u32>,
    /// Link to the published report of that job.
    pub download_link: Option<String>,
    /// Set once that job was aborted; a late link is no longer stored.
    pub aborted: bool,
}

/// An authenticated caller.
#[derive(Debug)]
pub struct Session {
    /// Backing server the session belongs to.
    pub endpoint: Endpoint,
    /// Caller the session belongs to.
    pub identity: UserIdentity,
    /// Session cookie.
    pub credential: Credential,
    /// When the session was established.
    pub created_at: DateTime<Utc>,
    /// When the session should be re-established.
    pub expires_at: DateTime<Utc>,
    state: RwLock<SessionState>,
}

impl Session {
    /// Create a session with an initial job reference.
    pub fn new(
        endpoint: Endpoint,
        identity: UserIdentity,
        credential: Credential,
        ttl: Duration,
        job_id: Option<JobId>,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            endpoint,
            identity,
            credential,
            created_at,
            expires_at,
            state: RwLock::new(SessionState {
                job_id,
                ..SessionState::default()
            }),
        }
    }

    /// Whether the session is past its TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Consistent copy of the mutable state.
    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Non-blocking snapshot; `None` while a writer holds the lock.
    pub fn try_snapshot(&self) -> Option<SessionState> {
        self.state.try_read().ok().map(|state| state.clone())
    }

    /// Point the session at a new job, dropping the previous job's pid and link.
    pub async fn begin_job(&self, job_id: JobId) {
        let mut state = self.state.write().await;
        *state = SessionState {
            job_id: Some(job_id),
            process_id: None,
            download_link: None,
            aborted: false,
        };
    }

    /// Record the renderer pid, if `job_id` is still the current job.
    pub async fn attach_process(&self, job_id: JobId, pid: Option<u32>) -> bool {
        let mut state = self.state.write().await;
        if state.job_id != Some(job_id) {
            return false;
        }
        state.process_id = pid;
        true
    }

    /// Store the download link, if `job_id` is still the current, unaborted job.
    pub async fn publish_link(&self, job_id: JobId, link: String) -> bool {
        let mut state = self.state.write().await;
        if state.job_id != Some(job_id) || state.aborted {
            return false;
        }
        state.download_link = Some(link);
        true
    }

    /// Mark the current job aborted and clear its pid and link; returns the
    /// state before clearing.
    pub async fn clear_for_abort(&self) -> SessionState {
        let mut state = self.state.write().await;
        let previous = state.clone();
        state.process_id = None;
        state.download_link = None;
        state.aborted = state.job_id.is_some();
        previous
    }
}

/// Configuration for [`SessionCache`].
#[derive(Debug, Clone)]
pub struct SessionCacheConfig {
    /// Validity of minted bearer tokens.
    pub token_validity: Duration,
    /// How long an established session is reused before re-authenticating.
    pub session_ttl: Duration,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            token_validity: DEFAULT_TOKEN_VALIDITY,
            session_ttl: DEFAULT_TOKEN_VALIDITY,
        }
    }
}

type SessionCell = Arc<OnceCell<Arc<Session>>>;

/// Concurrent `(endpoint, identity) -> Session` cache.
pub struct SessionCache {
    entries: DashMap<SessionKey, SessionCell>,
    minter: Arc<dyn TokenMinter>,
    exchange: Arc<dyn SessionExchange>,
    config: SessionCacheConfig,
}

impl SessionCache {
    /// Create an empty cache.
    pub fn new(
        minter: Arc<dyn TokenMinter>,
        exchange: Arc<dyn SessionExchange>,
        config: SessionCacheConfig,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            minter,
            exchange,
            config,
        }
    }

    /// Look up an established session. Never performs I/O.
    ///
    /// Expired sessions are still returned so in-flight jobs stay reachable.
    pub fn get_existing(&self, endpoint: &Endpoint, identity: &UserIdentity) -> Option<Arc<Session>> {
        let key = SessionKey::new(endpoint.clone(), identity.clone());
        self.entries
            .get(&key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Return the caller's session, authenticating first if there is none.
    ///
    /// An existing, unexpired session is returned unchanged. On failure
    /// nothing is inserted.
    pub async fn get_or_create(
        &self,
        endpoint: &Endpoint,
        identity: &UserIdentity,
        proxy: &ProxyConfig,
        job_id: Option<JobId>,
    ) -> Result<Arc<Session>, AuthError> {
        let key = SessionKey::new(endpoint.clone(), identity.clone());

        loop {
            let cell = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value()
                .clone();

            if let Some(session) = cell.get() {
                if !session.is_expired(Utc::now()) {
                    return Ok(session.clone());
                }
                debug!(identity = %identity, endpoint = %endpoint, "Session expired, re-authenticating");
                self.entries
                    .remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));
                continue;
            }

            let result = cell
                .get_or_try_init(|| self.authenticate(endpoint, identity, proxy, job_id))
                .await;

            return match result {
                Ok(session) => Ok(session.clone()),
                Err(e) => {
                    self.entries.remove_if(&key, |_, current| {
                        Arc::ptr_eq(current, &cell) && current.get().is_none()
                    });
                    warn!(identity = %identity, endpoint = %endpoint, error = %e, "Authentication failed");
                    Err(e)
                }
            };
        }
    }

    async fn authenticate(
        &self,
        endpoint: &Endpoint,
        identity: &UserIdentity,
        proxy: &ProxyConfig,
        job_id: Option<JobId>,
    ) -> Result<Arc<Session>, AuthError> {
        let token = self.minter.mint(identity, self.config.token_validity)?;
        let credential = self.exchange.login(endpoint, proxy, &token).await?;

        info!(identity = %identity, endpoint = %endpoint, "Session established");

        Ok(Arc::new(Session::new(
            endpoint.clone(),
            identity.clone(),
            credential,
            self.config.session_ttl,
            job_id,
        )))
    }

    /// Drop a caller's session.
    pub fn remove(&self, endpoint: &Endpoint, identity: &UserIdentity) -> bool {
        let key = SessionKey::new(endpoint.clone(), identity.clone());
        self.entries.remove(&key).is_some()
    }

    /// Evict sessions expired at `now` unless `in_flight` reports a running job.
    ///
    /// Sessions whose state is locked or still being created are kept.
    pub fn evict_expired<F>(&self, now: DateTime<Utc>, in_flight: F) -> usize
    where
        F: Fn(&SessionState) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|_, cell| match cell.get() {
            None => true,
            Some(session) if !session.is_expired(now) => true,
            Some(session) => match session.try_snapshot() {
                Some(state) => in_flight(&state),
                None => true,
            },
        });
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired sessions");
        }
        evicted
    }

    /// Number of cached sessions (including ones being created).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MockSessionExchange, MockTokenMinter};

    fn endpoint() -> Endpoint {
        Endpoint::parse("https://sense.example.com").unwrap()
    }

    fn cache_with(
        minter: Arc<MockTokenMinter>,
        exchange: Arc<MockSessionExchange>,
        config: SessionCacheConfig,
    ) -> SessionCache {
        SessionCache::new(minter, exchange, config)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let minter = Arc::new(MockTokenMinter::new());
        let exchange = Arc::new(MockSessionExchange::new());
        let cache = cache_with(minter.clone(), exchange.clone(), SessionCacheConfig::default());
        let identity = UserIdentity::new("CORP", "jdoe");
        let proxy = ProxyConfig::default();

        let first = cache
            .get_or_create(&endpoint(), &identity, &proxy, None)
            .await
            .unwrap();
        let second = cache
            .get_or_create(&endpoint(), &identity, &proxy, Some(JobId::new()))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(minter.mint_count(), 1);
        assert_eq!(exchange.login_count(), 1);
        assert_eq!(second.snapshot().await.job_id, None);
    }

    #[tokio::test]
    async fn test_failed_login_inserts_nothing() {
        let minter = Arc::new(MockTokenMinter::new());
        let exchange = Arc::new(MockSessionExchange::new());
        exchange.set_failing(true);
        let cache = cache_with(minter, exchange.clone(), SessionCacheConfig::default());
        let identity = UserIdentity::new("CORP", "jdoe");

        let result = cache
            .get_or_create(&endpoint(), &identity, &ProxyConfig::default(), None)
            .await;

        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(cache.get_existing(&endpoint(), &identity).is_none());

        exchange.set_failing(false);
        assert!(
            cache
                .get_or_create(&endpoint(), &identity, &ProxyConfig::default(), None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_expired_session_is_reauthenticated() {
        let minter = Arc::new(MockTokenMinter::new());
        let exchange = Arc::new(MockSessionExchange::new());
        let config = SessionCacheConfig {
            token_validity: Duration::from_secs(60),
            session_ttl: Duration::ZERO,
        };
        let cache = cache_with(minter.clone(), exchange, config);
        let identity = UserIdentity::new("CORP", "jdoe");
        let proxy = ProxyConfig::default();

        let first = cache
            .get_or_create(&endpoint(), &identity, &proxy, None)
            .await
            .unwrap();
        let second = cache
            .get_or_create(&endpoint(), &identity, &proxy, None)
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.credential, second.credential);
        assert_eq!(minter.mint_count(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_expired_keeps_in_flight_sessions() {
        let config = SessionCacheConfig {
            token_validity: Duration::from_secs(60),
            session_ttl: Duration::ZERO,
        };
        let cache = cache_with(
            Arc::new(MockTokenMinter::new()),
            Arc::new(MockSessionExchange::new()),
            config,
        );
        let busy = UserIdentity::new("CORP", "busy");
        let idle = UserIdentity::new("CORP", "idle");
        let proxy = ProxyConfig::default();

        cache
            .get_or_create(&endpoint(), &busy, &proxy, Some(JobId::new()))
            .await
            .unwrap();
        cache
            .get_or_create(&endpoint(), &idle, &proxy, None)
            .await
            .unwrap();

        let evicted = cache.evict_expired(Utc::now(), |state| state.job_id.is_some());

        assert_eq!(evicted, 1);
        assert!(cache.get_existing(&endpoint(), &busy).is_some());
        assert!(cache.get_existing(&endpoint(), &idle).is_none());
    }

    #[tokio::test]
    async fn test_link_only_published_for_current_job() {
        let session = Session::new(
            endpoint(),
            UserIdentity::new("CORP", "jdoe"),
            Credential {
                name: "X-Qlik-Session".to_string(),
                value: "v".to_string(),
            },
            Duration::from_secs(60),
            None,
        );
        let old_job = JobId::new();
        let new_job = JobId::new();

        session.begin_job(old_job).await;
        assert!(session.attach_process(old_job, Some(42)).await);
        session.begin_job(new_job).await;

        assert!(!session.publish_link(old_job, "stale".to_string()).await);
        assert!(session.publish_link(new_job, "fresh".to_string()).await);

        let state = session.snapshot().await;
        assert_eq!(state.job_id, Some(new_job));
        assert_eq!(state.process_id, None);
        assert_eq!(state.download_link.as_deref(), Some("fresh"));

        let previous = session.clear_for_abort().await;
        assert_eq!(previous.download_link.as_deref(), Some("fresh"));
        assert_eq!(session.snapshot().await.download_link, None);
    }

    #[tokio::test]
    async fn test_link_refused_after_abort_until_next_job() {
        let session = Session::new(
            endpoint(),
            UserIdentity::new("CORP", "jdoe"),
            Credential {
                name: "X-Qlik-Session".to_string(),
                value: "v".to_string(),
            },
            Duration::from_secs(60),
            None,
        );
        let job = JobId::new();
        session.begin_job(job).await;

        session.clear_for_abort().await;
        assert!(!session.publish_link(job, "late".to_string()).await);

        let state = session.snapshot().await;
        assert!(state.aborted);
        assert_eq!(state.job_id, Some(job));
        assert_eq!(state.download_link, None);

        let next = JobId::new();
        session.begin_job(next).await;
        assert!(!session.snapshot().await.aborted);
        assert!(session.publish_link(next, "fresh".to_string()).await);
    }
}
