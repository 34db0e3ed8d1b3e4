// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background reachability check against the backing server.
//!
//! The checker probes the configured server and, when it does not answer,
//! each fallback in turn. It never fails the process; the latest observation
//! is published on a `watch` channel for the health endpoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ondemand_core::Endpoint;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

/// Outcome of the latest check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    /// No check has completed yet.
    Unknown,
    /// The configured server answered.
    Reachable,
    /// Only a fallback server answered.
    Fallback,
    /// Nothing answered.
    Unreachable,
}

/// Latest connectivity observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityStatus {
    /// Outcome.
    pub state: ConnectivityState,
    /// Server that answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// When the check finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
    /// Failure of the configured server, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for ConnectivityStatus {
    fn default() -> Self {
        Self {
            state: ConnectivityState::Unknown,
            endpoint: None,
            checked_at: None,
            error: None,
        }
    }
}

/// Configuration for the connectivity checker.
#[derive(Debug, Clone)]
pub struct ConnectivityCheckerConfig {
    /// Configured backing server.
    pub primary: Endpoint,
    /// Servers tried when the primary does not answer.
    pub fallbacks: Vec<Endpoint>,
    /// Virtual proxy path probes go through.
    pub proxy_path: String,
    /// Delay between checks.
    pub interval: Duration,
    /// Timeout of a single probe.
    pub request_timeout: Duration,
    /// Accept invalid TLS certificates.
    pub skip_cert_verification: bool,
}

impl ConnectivityCheckerConfig {
    /// Defaults for everything but the primary server.
    pub fn new(primary: Endpoint) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            proxy_path: String::new(),
            interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            skip_cert_verification: false,
        }
    }
}

/// Background worker probing the backing server.
pub struct ConnectivityChecker {
    config: ConnectivityCheckerConfig,
    client: reqwest::Client,
    status: watch::Sender<ConnectivityStatus>,
    shutdown: Arc<Notify>,
}

impl ConnectivityChecker {
    /// Create a checker.
    pub fn new(config: ConnectivityCheckerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.skip_cert_verification)
            .build()?;
        let (status, _) = watch::channel(ConnectivityStatus::default());
        Ok(Self {
            config,
            client,
            status,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Receiver of the latest observation.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status.subscribe()
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run checks until the shutdown signal is received.
    ///
    /// The first check runs immediately.
    pub async fn run(&self) {
        info!(
            endpoint = %self.config.primary,
            fallbacks = self.config.fallbacks.len(),
            interval_secs = self.config.interval.as_secs(),
            "Connectivity checker started"
        );

        loop {
            self.check_once().await;

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Connectivity checker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!("Connectivity checker stopped");
    }

    /// Probe the primary server, then the fallbacks, and publish the result.
    pub async fn check_once(&self) -> ConnectivityStatus {
        let primary = &self.config.primary;
        let observation = match self.probe(primary).await {
            Ok(()) => {
                debug!(endpoint = %primary, "Backing server is reachable");
                ConnectivityStatus {
                    state: ConnectivityState::Reachable,
                    endpoint: Some(primary.to_string()),
                    checked_at: Some(Utc::now()),
                    error: None,
                }
            }
            Err(reason) => {
                error!(endpoint = %primary, error = %reason, "No connection to the backing server");
                self.try_fallbacks(reason).await
            }
        };

        self.status.send_replace(observation.clone());
        observation
    }

    async fn try_fallbacks(&self, primary_error: String) -> ConnectivityStatus {
        for fallback in &self.config.fallbacks {
            warn!(endpoint = %fallback, "Testing fallback server");
            match self.probe(fallback).await {
                Ok(()) => {
                    warn!(endpoint = %fallback, "Fallback server is reachable");
                    return ConnectivityStatus {
                        state: ConnectivityState::Fallback,
                        endpoint: Some(fallback.to_string()),
                        checked_at: Some(Utc::now()),
                        error: Some(primary_error),
                    };
                }
                Err(reason) => {
                    warn!(endpoint = %fallback, error = %reason, "Fallback server is unreachable")
                }
            }
        }

        ConnectivityStatus {
            state: ConnectivityState::Unreachable,
            endpoint: None,
            checked_at: Some(Utc::now()),
            error: Some(primary_error),
        }
    }

    /// Any answer below 500 means the proxy is up.
    async fn probe(&self, endpoint: &Endpoint) -> Result<(), String> {
        let url = endpoint.join(&[&self.config.proxy_path, "hub"]);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_server_error() {
            return Err(format!("{} answered with status {}", url, status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(primary: &str, fallbacks: &[&str]) -> ConnectivityCheckerConfig {
        let mut config = ConnectivityCheckerConfig::new(Endpoint::parse(primary).unwrap());
        config.fallbacks = fallbacks.iter().map(|f| Endpoint::parse(f).unwrap()).collect();
        config.proxy_path = "ser".to_string();
        config.request_timeout = Duration::from_secs(2);
        config
    }

    #[tokio::test]
    async fn test_reachable_primary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ser/hub"))
            .respond_with(ResponseTemplate::new(302))
            .expect(1)
            .mount(&server)
            .await;

        let checker = ConnectivityChecker::new(config(&server.uri(), &[])).unwrap();
        let rx = checker.subscribe();
        let status = checker.check_once().await;

        assert_eq!(status.state, ConnectivityState::Reachable);
        assert_eq!(status.endpoint.as_deref(), Some(server.uri().as_str()));
        assert_eq!(*rx.borrow(), status);
    }

    #[tokio::test]
    async fn test_falls_back_when_primary_fails() {
        let primary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&primary)
            .await;
        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&down)
            .await;
        let fallback = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ser/hub"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&fallback)
            .await;

        let checker = ConnectivityChecker::new(config(
            &primary.uri(),
            &[&down.uri(), &fallback.uri()],
        ))
        .unwrap();
        let status = checker.check_once().await;

        assert_eq!(status.state, ConnectivityState::Fallback);
        assert_eq!(status.endpoint.as_deref(), Some(fallback.uri().as_str()));
        assert!(status.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_unreachable_when_nothing_answers() {
        let primary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&primary)
            .await;

        let checker = ConnectivityChecker::new(config(&primary.uri(), &[])).unwrap();
        let status = checker.check_once().await;

        assert_eq!(status.state, ConnectivityState::Unreachable);
        assert!(status.endpoint.is_none());
        assert!(status.checked_at.is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let checker = Arc::new(ConnectivityChecker::new(config(&server.uri(), &[])).unwrap());
        let mut rx = checker.subscribe();
        let shutdown = checker.shutdown_handle();
        let worker = checker.clone();
        let handle = tokio::spawn(async move { worker.run().await });

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, ConnectivityState::Reachable);

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
