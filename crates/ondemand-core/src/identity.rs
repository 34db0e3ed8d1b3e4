// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caller identity and backing server endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing identities and endpoints.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The identity string did not contain a directory and an id.
    #[error("invalid user identity '{0}': expected 'UserDirectory=<dir>; UserId=<id>' or '<dir>\\<id>'")]
    InvalidIdentity(String),

    /// The endpoint is not an absolute http(s) URL.
    #[error("invalid endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),
}

/// A caller, identified by user directory and user id.
///
/// Identities are supplied with every call and never generated internally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    /// User directory (e.g. `INTERNAL`, a domain name).
    pub directory: String,
    /// User id within the directory.
    pub id: String,
}

impl UserIdentity {
    /// Create an identity from its parts.
    pub fn new(directory: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            id: id.into(),
        }
    }

    /// Parse an identity from transport metadata.
    ///
    /// Accepts `UserDirectory=<dir>; UserId=<id>` (keys case-insensitive, any
    /// order) and the short `<dir>\<id>` form.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let raw_trimmed = raw.trim();
        let invalid = || IdentityError::InvalidIdentity(raw.to_string());

        if raw_trimmed.contains('=') {
            let mut directory = None;
            let mut id = None;
            for part in raw_trimmed.split(';') {
                let Some((key, value)) = part.split_once('=') else {
                    continue;
                };
                let value = value.trim();
                match key.trim().to_ascii_lowercase().as_str() {
                    "userdirectory" => directory = Some(value.to_string()),
                    "userid" => id = Some(value.to_string()),
                    _ => {}
                }
            }
            return match (directory, id) {
                (Some(d), Some(i)) if !d.is_empty() && !i.is_empty() => Ok(Self::new(d, i)),
                _ => Err(invalid()),
            };
        }

        match raw_trimmed.split_once('\\') {
            Some((d, i)) if !d.trim().is_empty() && !i.trim().is_empty() => {
                Ok(Self::new(d.trim(), i.trim()))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}", self.directory, self.id)
    }
}

/// Address of the backing server sessions are authenticated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    /// Parse and normalize an endpoint URL (trailing slashes are dropped).
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let parsed = url::Url::parse(raw.trim())
            .map_err(|e| IdentityError::InvalidEndpoint(raw.to_string(), e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(IdentityError::InvalidEndpoint(
                raw.to_string(),
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }
        Ok(Self(parsed.as_str().trim_end_matches('/').to_string()))
    }

    /// The normalized URL.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join path segments onto the endpoint, skipping empty segments.
    pub fn join(&self, segments: &[&str]) -> String {
        let mut out = self.0.clone();
        for segment in segments {
            let segment = segment.trim_matches('/');
            if segment.is_empty() {
                continue;
            }
            out.push('/');
            out.push_str(segment);
        }
        out
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value_identity() {
        let identity = UserIdentity::parse("UserDirectory=INTERNAL; UserId=sa_scheduler").unwrap();
        assert_eq!(identity, UserIdentity::new("INTERNAL", "sa_scheduler"));
    }

    #[test]
    fn test_parse_key_value_identity_any_order_and_case() {
        let identity = UserIdentity::parse("userid=jdoe;USERDIRECTORY=CORP").unwrap();
        assert_eq!(identity.directory, "CORP");
        assert_eq!(identity.id, "jdoe");
    }

    #[test]
    fn test_parse_short_identity() {
        let identity = UserIdentity::parse("CORP\\jdoe").unwrap();
        assert_eq!(identity.to_string(), "CORP\\jdoe");
    }

    #[test]
    fn test_parse_rejects_incomplete_identity() {
        assert!(UserIdentity::parse("UserDirectory=CORP").is_err());
        assert!(UserIdentity::parse("UserDirectory=; UserId=x").is_err());
        assert!(UserIdentity::parse("jdoe").is_err());
        assert!(UserIdentity::parse("").is_err());
    }

    #[test]
    fn test_endpoint_normalizes_trailing_slash() {
        let endpoint = Endpoint::parse("https://sense.example.com/").unwrap();
        assert_eq!(endpoint.as_str(), "https://sense.example.com");
    }

    #[test]
    fn test_endpoint_join_skips_empty_segments() {
        let endpoint = Endpoint::parse("https://sense.example.com").unwrap();
        assert_eq!(
            endpoint.join(&["", "/ser/", "sense/app"]),
            "https://sense.example.com/ser/sense/app"
        );
    }

    #[test]
    fn test_endpoint_rejects_non_http() {
        assert!(Endpoint::parse("ftp://example.com").is_err());
        assert!(Endpoint::parse("not a url").is_err());
    }
}
