// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ondemand_core::auth::jwt::JwtTokenMinter;
use ondemand_core::auth::{AuthError, DEFAULT_COOKIE_NAME, ProxyConfig};
use ondemand_core::orchestrator::DEFAULT_REPORT_NAME;
use ondemand_core::{Endpoint, OrchestratorConfig, SessionCacheConfig};

/// Where the token signing key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningKey {
    /// RSA private key in PEM format (RS256).
    PemFile(PathBuf),
    /// Shared secret (HS256).
    Secret(String),
}

impl SigningKey {
    /// Build the token minter for this key.
    pub fn minter(&self) -> Result<JwtTokenMinter, AuthError> {
        match self {
            SigningKey::PemFile(path) => JwtTokenMinter::from_pem_file(path),
            SigningKey::Secret(secret) => Ok(JwtTokenMinter::from_secret(secret.as_bytes())),
        }
    }
}

/// Connector configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backing server
    pub server_uri: Endpoint,
    /// Alternative servers probed when the backing server is unreachable
    pub fallback_uris: Vec<Endpoint>,
    /// HTTP listen address
    pub bind_addr: SocketAddr,
    /// Parent of job working directories
    pub work_dir: PathBuf,
    /// Directory relative template paths resolve against
    pub template_dir: PathBuf,
    /// Renderer executable
    pub renderer_path: PathBuf,
    /// Virtual proxy sessions are established through
    pub proxy: ProxyConfig,
    /// Token signing key
    pub signing_key: SigningKey,
    /// Name published reports are stored under
    pub report_name: String,
    /// Validity of minted tokens, also used as the session lifetime
    pub token_validity: Duration,
    /// Runtime limit per job
    pub job_timeout: Option<Duration>,
    /// Maximum concurrently watched jobs
    pub max_active_jobs: usize,
    /// Delay between job status polls
    pub poll_interval: Duration,
    /// Accept invalid TLS certificates from the backing server
    pub skip_cert_verification: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `ONDEMAND_SERVER_URI`: backing server URL
    /// - `ONDEMAND_JWT_KEY_PATH` or `ONDEMAND_JWT_SECRET`: token signing key
    ///
    /// Optional (with defaults):
    /// - `ONDEMAND_BIND_HOST` (127.0.0.1), `ONDEMAND_BIND_PORT` (50059)
    /// - `ONDEMAND_WORK_DIR` (.data/jobs), `ONDEMAND_TEMPLATE_DIR` (templates)
    /// - `ONDEMAND_RENDERER_PATH` (ser-engine)
    /// - `ONDEMAND_PROXY_PATH` (empty), `ONDEMAND_COOKIE_NAME` (X-Qlik-Session)
    /// - `ONDEMAND_REPORT_NAME` (OnDemandReport)
    /// - `ONDEMAND_FALLBACK_URIS`: comma-separated list (empty)
    /// - `ONDEMAND_TOKEN_VALIDITY_SECS` (1200)
    /// - `ONDEMAND_JOB_TIMEOUT_SECS` (3600, `0` disables the limit)
    /// - `ONDEMAND_MAX_ACTIVE_JOBS` (16)
    /// - `ONDEMAND_POLL_INTERVAL_MS` (250)
    /// - `ONDEMAND_SKIP_CERT_VERIFICATION` (false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_uri = std::env::var("ONDEMAND_SERVER_URI")
            .map_err(|_| ConfigError::Missing("ONDEMAND_SERVER_URI"))?;
        let server_uri = Endpoint::parse(&raw_uri)
            .map_err(|_| ConfigError::Invalid("ONDEMAND_SERVER_URI", "must be an absolute URL"))?;

        let fallback_uris = optional_var("ONDEMAND_FALLBACK_URIS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        Endpoint::parse(s).map_err(|_| {
                            ConfigError::Invalid(
                                "ONDEMAND_FALLBACK_URIS",
                                "must be a comma-separated list of absolute URLs",
                            )
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let host: IpAddr = parse_var("ONDEMAND_BIND_HOST", "127.0.0.1", "must be an IP address")?;
        let port: u16 = parse_var("ONDEMAND_BIND_PORT", "50059", "must be a valid port number")?;

        let signing_key = match (
            optional_var("ONDEMAND_JWT_KEY_PATH"),
            optional_var("ONDEMAND_JWT_SECRET"),
        ) {
            (Some(path), _) => SigningKey::PemFile(PathBuf::from(path)),
            (None, Some(secret)) => SigningKey::Secret(secret),
            (None, None) => return Err(ConfigError::Missing("ONDEMAND_JWT_KEY_PATH")),
        };

        let token_validity_secs: u64 = parse_var(
            "ONDEMAND_TOKEN_VALIDITY_SECS",
            "1200",
            "must be a positive number of seconds",
        )?;
        if token_validity_secs == 0 {
            return Err(ConfigError::Invalid(
                "ONDEMAND_TOKEN_VALIDITY_SECS",
                "must be a positive number of seconds",
            ));
        }

        let job_timeout_secs: u64 = parse_var(
            "ONDEMAND_JOB_TIMEOUT_SECS",
            "3600",
            "must be a number of seconds",
        )?;

        let max_active_jobs: usize = parse_var(
            "ONDEMAND_MAX_ACTIVE_JOBS",
            "16",
            "must be a positive integer",
        )?;
        if max_active_jobs == 0 {
            return Err(ConfigError::Invalid(
                "ONDEMAND_MAX_ACTIVE_JOBS",
                "must be a positive integer",
            ));
        }

        let poll_interval_ms: u64 = parse_var(
            "ONDEMAND_POLL_INTERVAL_MS",
            "250",
            "must be a number of milliseconds",
        )?;

        let skip_cert_verification = parse_bool("ONDEMAND_SKIP_CERT_VERIFICATION")?;

        Ok(Self {
            server_uri,
            fallback_uris,
            bind_addr: SocketAddr::new(host, port),
            work_dir: PathBuf::from(var_or("ONDEMAND_WORK_DIR", ".data/jobs")),
            template_dir: PathBuf::from(var_or("ONDEMAND_TEMPLATE_DIR", "templates")),
            renderer_path: PathBuf::from(var_or("ONDEMAND_RENDERER_PATH", "ser-engine")),
            proxy: ProxyConfig {
                path: var_or("ONDEMAND_PROXY_PATH", ""),
                cookie_name: var_or("ONDEMAND_COOKIE_NAME", DEFAULT_COOKIE_NAME),
            },
            signing_key,
            report_name: var_or("ONDEMAND_REPORT_NAME", DEFAULT_REPORT_NAME),
            token_validity: Duration::from_secs(token_validity_secs),
            job_timeout: (job_timeout_secs > 0).then(|| Duration::from_secs(job_timeout_secs)),
            max_active_jobs,
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            skip_cert_verification,
        })
    }

    /// Orchestrator settings derived from this configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new(self.server_uri.clone());
        config.working_dir_root = self.work_dir.clone();
        config.template_root = self.template_dir.clone();
        config.proxy = self.proxy.clone();
        config.report_name = self.report_name.clone();
        config.poll_interval = self.poll_interval;
        config.job_timeout = self.job_timeout;
        config.max_active_jobs = self.max_active_jobs;
        config
    }

    /// Session cache settings derived from this configuration.
    pub fn session_cache_config(&self) -> SessionCacheConfig {
        SessionCacheConfig {
            token_validity: self.token_validity,
            session_ttl: self.token_validity,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(
    key: &'static str,
    default: &str,
    reason: &'static str,
) -> Result<T, ConfigError> {
    optional_var(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(key, reason))
}

fn parse_bool(key: &'static str) -> Result<bool, ConfigError> {
    match optional_var(key) {
        None => Ok(false),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(key, "must be true or false")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "ONDEMAND_SERVER_URI",
        "ONDEMAND_BIND_HOST",
        "ONDEMAND_BIND_PORT",
        "ONDEMAND_WORK_DIR",
        "ONDEMAND_TEMPLATE_DIR",
        "ONDEMAND_RENDERER_PATH",
        "ONDEMAND_PROXY_PATH",
        "ONDEMAND_COOKIE_NAME",
        "ONDEMAND_JWT_KEY_PATH",
        "ONDEMAND_JWT_SECRET",
        "ONDEMAND_REPORT_NAME",
        "ONDEMAND_FALLBACK_URIS",
        "ONDEMAND_TOKEN_VALIDITY_SECS",
        "ONDEMAND_JOB_TIMEOUT_SECS",
        "ONDEMAND_MAX_ACTIVE_JOBS",
        "ONDEMAND_POLL_INTERVAL_MS",
        "ONDEMAND_SKIP_CERT_VERIFICATION",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        /// Start from a clean slate: every connector variable unset.
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in ALL_VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ONDEMAND_SERVER_URI", "https://sense.example.com/");
        guard.set("ONDEMAND_JWT_SECRET", "s3cret");

        let config = Config::from_env().unwrap();

        assert_eq!(config.server_uri.as_str(), "https://sense.example.com");
        assert!(config.fallback_uris.is_empty());
        assert_eq!(config.bind_addr, "127.0.0.1:50059".parse().unwrap());
        assert_eq!(config.work_dir, PathBuf::from(".data/jobs"));
        assert_eq!(config.template_dir, PathBuf::from("templates"));
        assert_eq!(config.renderer_path, PathBuf::from("ser-engine"));
        assert_eq!(config.proxy.path, "");
        assert_eq!(config.proxy.cookie_name, "X-Qlik-Session");
        assert_eq!(config.signing_key, SigningKey::Secret("s3cret".to_string()));
        assert_eq!(config.report_name, "OnDemandReport");
        assert_eq!(config.token_validity, Duration::from_secs(1200));
        assert_eq!(config.job_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(config.max_active_jobs, 16);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(!config.skip_cert_verification);
    }

    #[test]
    fn test_config_from_env_with_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ONDEMAND_SERVER_URI", "https://sense.example.com");
        guard.set("ONDEMAND_JWT_KEY_PATH", "/etc/ondemand/key.pem");
        guard.set("ONDEMAND_JWT_SECRET", "ignored");
        guard.set("ONDEMAND_BIND_HOST", "0.0.0.0");
        guard.set("ONDEMAND_BIND_PORT", "9000");
        guard.set("ONDEMAND_PROXY_PATH", "ser");
        guard.set(
            "ONDEMAND_FALLBACK_URIS",
            "https://node2.example.com, https://node3.example.com,",
        );
        guard.set("ONDEMAND_JOB_TIMEOUT_SECS", "0");
        guard.set("ONDEMAND_MAX_ACTIVE_JOBS", "4");
        guard.set("ONDEMAND_SKIP_CERT_VERIFICATION", "true");

        let config = Config::from_env().unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(
            config.signing_key,
            SigningKey::PemFile(PathBuf::from("/etc/ondemand/key.pem"))
        );
        assert_eq!(config.proxy.path, "ser");
        assert_eq!(config.fallback_uris.len(), 2);
        assert_eq!(config.fallback_uris[1].as_str(), "https://node3.example.com");
        assert_eq!(config.job_timeout, None);
        assert_eq!(config.max_active_jobs, 4);
        assert!(config.skip_cert_verification);

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.connect_uri(), "https://sense.example.com/ser");
        assert_eq!(orchestrator.max_active_jobs, 4);
        assert_eq!(orchestrator.job_timeout, None);
    }

    #[test]
    fn test_config_requires_server_uri() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ONDEMAND_JWT_SECRET", "s3cret");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ONDEMAND_SERVER_URI")));
    }

    #[test]
    fn test_config_requires_signing_key() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ONDEMAND_SERVER_URI", "https://sense.example.com");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ONDEMAND_JWT_KEY_PATH")));
    }

    #[test]
    fn test_config_rejects_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ONDEMAND_SERVER_URI", "https://sense.example.com");
        guard.set("ONDEMAND_JWT_SECRET", "s3cret");

        guard.set("ONDEMAND_BIND_PORT", "not-a-port");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("ONDEMAND_BIND_PORT", _)
        ));
        guard.set("ONDEMAND_BIND_PORT", "50059");

        guard.set("ONDEMAND_MAX_ACTIVE_JOBS", "0");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("ONDEMAND_MAX_ACTIVE_JOBS", _)
        ));
        guard.set("ONDEMAND_MAX_ACTIVE_JOBS", "16");

        guard.set("ONDEMAND_SKIP_CERT_VERIFICATION", "maybe");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("ONDEMAND_SKIP_CERT_VERIFICATION", _)
        ));
    }

    #[test]
    fn test_secret_signing_key_builds_minter() {
        let key = SigningKey::Secret("s3cret".to_string());
        assert!(key.minter().is_ok());

        let missing = SigningKey::PemFile(PathBuf::from("/nonexistent/key.pem"));
        assert!(missing.minter().is_err());
    }
}
