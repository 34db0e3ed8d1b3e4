// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JWT bearer token minting.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use super::{AuthError, TokenMinter};
use crate::identity::UserIdentity;

/// Attributes claim attached to every token.
const DEFAULT_ATTRIBUTES: &str = "[SerOnDemand]";

/// Claims understood by the backing server's JWT virtual proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User directory of the caller.
    #[serde(rename = "UserDirectory")]
    pub user_directory: String,
    /// User id of the caller.
    #[serde(rename = "UserId")]
    pub user_id: String,
    /// Free-form attributes.
    #[serde(rename = "Attributes")]
    pub attributes: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Expiry (seconds since epoch).
    pub exp: i64,
}

/// Mints signed JWTs for caller identities.
pub struct JwtTokenMinter {
    key: EncodingKey,
    algorithm: Algorithm,
    attributes: String,
}

impl JwtTokenMinter {
    /// Create a minter signing with an RSA private key (PEM, RS256).
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, AuthError> {
        let key = EncodingKey::from_rsa_pem(pem).map_err(|e| AuthError::Key(e.to_string()))?;
        Ok(Self {
            key,
            algorithm: Algorithm::RS256,
            attributes: DEFAULT_ATTRIBUTES.to_string(),
        })
    }

    /// Create a minter reading an RSA private key from a PEM file.
    pub fn from_pem_file(path: &Path) -> Result<Self, AuthError> {
        let pem = std::fs::read(path)
            .map_err(|e| AuthError::Key(format!("{}: {}", path.display(), e)))?;
        Self::from_rsa_pem(&pem)
    }

    /// Create a minter signing with a shared secret (HS256).
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            attributes: DEFAULT_ATTRIBUTES.to_string(),
        }
    }

    /// Override the attributes claim.
    pub fn with_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.attributes = attributes.into();
        self
    }

    /// Signing algorithm in use.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

impl TokenMinter for JwtTokenMinter {
    fn mint(&self, identity: &UserIdentity, validity: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            user_directory: identity.directory.clone(),
            user_id: identity.id.clone(),
            attributes: self.attributes.clone(),
            iat: now,
            exp: now + validity.as_secs() as i64,
        };

        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.key).map_err(|e| {
            AuthError::Mint {
                identity: identity.to_string(),
                reason: e.to_string(),
            }
        })
    }
}
