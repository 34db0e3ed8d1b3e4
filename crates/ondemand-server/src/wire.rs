// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request and response shapes of the function endpoint.
//!
//! Parameters travel as a bundle of rows, each row a list of duals. A call
//! reads the duals of the first row; the reply is one row holding one dual
//! whose `strData` is the JSON encoded [`OnDemandResult`].

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use ondemand_core::{CallContext, OnDemandResult, UserIdentity};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Function id header.
pub const HEADER_FUNCTION_ID: &str = "x-function-id";
/// Caller identity header.
pub const HEADER_USER_ID: &str = "x-user-id";
/// Target application header.
pub const HEADER_APP_ID: &str = "x-app-id";

/// One value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dual {
    /// String representation.
    #[serde(default)]
    pub str_data: String,
    /// Numeric representation, when the caller sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_data: Option<f64>,
}

/// One row of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Values in parameter order.
    #[serde(default)]
    pub duals: Vec<Dual>,
}

/// Request and response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundledRows {
    /// Rows.
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl BundledRows {
    /// Decode a request body. An empty body carries no parameters.
    pub fn from_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
    }

    /// String parameters of the first row.
    pub fn parameters(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.duals.iter().map(|d| d.str_data.clone()).collect())
            .unwrap_or_default()
    }

    /// A single row holding a single string value.
    pub fn single(value: impl Into<String>) -> Self {
        Self {
            rows: vec![Row {
                duals: vec![Dual {
                    str_data: value.into(),
                    num_data: None,
                }],
            }],
        }
    }

    /// Wrap a call result.
    pub fn from_result(result: &OnDemandResult) -> Self {
        let encoded = serde_json::to_string(result).unwrap_or_else(|e| {
            error!(error = %e, "Failed to encode call result");
            json!({ "status": ondemand_core::dispatcher::STATUS_FAILED }).to_string()
        });
        Self::single(encoded)
    }
}

/// Metadata extracted from request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMetadata {
    /// Requested function.
    pub function_id: i32,
    /// Caller and target application.
    pub context: CallContext,
}

impl CallMetadata {
    /// Read call metadata from `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, HeaderError> {
        let function_id = required(headers, HEADER_FUNCTION_ID)?
            .parse::<i32>()
            .map_err(|_| HeaderError::Invalid {
                header: HEADER_FUNCTION_ID,
                reason: "must be an integer".to_string(),
            })?;

        let identity =
            UserIdentity::parse(required(headers, HEADER_USER_ID)?).map_err(|e| {
                HeaderError::Invalid {
                    header: HEADER_USER_ID,
                    reason: e.to_string(),
                }
            })?;

        let app_id = match headers.get(HEADER_APP_ID) {
            None => None,
            Some(value) => {
                let value = value.to_str().map_err(|_| HeaderError::Invalid {
                    header: HEADER_APP_ID,
                    reason: "must be visible ASCII".to_string(),
                })?;
                Some(value.trim().to_string()).filter(|v| !v.is_empty())
            }
        };

        Ok(Self {
            function_id,
            context: CallContext { identity, app_id },
        })
    }
}

fn required<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, HeaderError> {
    let value = headers.get(name).ok_or(HeaderError::Missing(name))?;
    let value = value.to_str().map_err(|_| HeaderError::Invalid {
        header: name,
        reason: "must be visible ASCII".to_string(),
    })?;
    let value = value.trim();
    if value.is_empty() {
        return Err(HeaderError::Missing(name));
    }
    Ok(value)
}

/// Missing or malformed call metadata.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// A required header is absent or empty.
    #[error("missing required header '{0}'")]
    Missing(&'static str),

    /// A header could not be interpreted.
    #[error("invalid header '{header}': {reason}")]
    Invalid {
        /// Header name.
        header: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl IntoResponse for HeaderError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_empty_body_has_no_parameters() {
        let rows = BundledRows::from_body(b"").unwrap();
        assert!(rows.parameters().is_empty());

        let rows = BundledRows::from_body(b"  \n").unwrap();
        assert!(rows.parameters().is_empty());
    }

    #[test]
    fn test_parameters_come_from_first_row() {
        let body = br#"{"rows":[
            {"duals":[{"strData":"Sales.xlsx"},{"strData":"pdf"},{"strData":"true","numData":1}]},
            {"duals":[{"strData":"ignored"}]}
        ]}"#;
        let rows = BundledRows::from_body(body).unwrap();
        assert_eq!(rows.parameters(), vec!["Sales.xlsx", "pdf", "true"]);
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        assert!(BundledRows::from_body(b"{not json").is_err());
    }

    #[test]
    fn test_result_is_wrapped_in_single_dual() {
        let result = OnDemandResult::failed("No existing session found.");
        let rows = BundledRows::from_result(&result);

        assert_eq!(rows.rows.len(), 1);
        assert_eq!(rows.rows[0].duals.len(), 1);
        let decoded: OnDemandResult = serde_json::from_str(&rows.rows[0].duals[0].str_data).unwrap();
        assert_eq!(decoded, result);

        let encoded = serde_json::to_value(&rows).unwrap();
        assert!(encoded["rows"][0]["duals"][0].get("numData").is_none());
    }

    #[test]
    fn test_metadata_from_headers() {
        let map = headers(&[
            (HEADER_FUNCTION_ID, "2"),
            (HEADER_USER_ID, "UserDirectory=CORP; UserId=jdoe"),
            (HEADER_APP_ID, "app-123"),
        ]);
        let meta = CallMetadata::from_headers(&map).unwrap();

        assert_eq!(meta.function_id, 2);
        assert_eq!(meta.context.identity, UserIdentity::new("CORP", "jdoe"));
        assert_eq!(meta.context.app_id.as_deref(), Some("app-123"));
    }

    #[test]
    fn test_app_id_is_optional() {
        let map = headers(&[(HEADER_FUNCTION_ID, "1"), (HEADER_USER_ID, "CORP\\jdoe")]);
        let meta = CallMetadata::from_headers(&map).unwrap();
        assert_eq!(meta.context.app_id, None);
    }

    #[test]
    fn test_missing_and_invalid_headers() {
        let map = headers(&[(HEADER_USER_ID, "CORP\\jdoe")]);
        assert_eq!(
            CallMetadata::from_headers(&map).unwrap_err(),
            HeaderError::Missing(HEADER_FUNCTION_ID)
        );

        let map = headers(&[(HEADER_FUNCTION_ID, "one"), (HEADER_USER_ID, "CORP\\jdoe")]);
        assert!(matches!(
            CallMetadata::from_headers(&map).unwrap_err(),
            HeaderError::Invalid { header: HEADER_FUNCTION_ID, .. }
        ));

        let map = headers(&[(HEADER_FUNCTION_ID, "1"), (HEADER_USER_ID, "jdoe")]);
        assert!(matches!(
            CallMetadata::from_headers(&map).unwrap_err(),
            HeaderError::Invalid { header: HEADER_USER_ID, .. }
        ));
    }

    #[test]
    fn test_header_error_is_bad_request() {
        let response = HeaderError::Missing(HEADER_USER_ID).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
