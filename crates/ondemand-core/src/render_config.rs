// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Render job configuration (`job.json`).
//!
//! This is the document handed to the renderer through its working
//! directory. It is either built from CREATE parameters or supplied whole by
//! a START call (JSON or Hjson), in which case it is validated against the
//! same shape. Fields the connector does not interpret are carried through
//! to `job.json` untouched.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::auth::Credential;

/// File name of the persisted configuration inside a working directory.
pub const CONFIG_FILE_NAME: &str = "job.json";

/// Credential type telling the renderer to reuse a session cookie.
pub const SESSION_CREDENTIAL_TYPE: &str = "SESSION";

/// Errors raised when a supplied configuration does not fit the job shape.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    /// The payload is neither JSON nor Hjson.
    #[error("job configuration is invalid: {0}")]
    Syntax(#[from] deser_hjson::Error),

    /// The payload does not have the shape of a job configuration.
    #[error("job configuration is invalid: {0}")]
    Invalid(#[from] serde_json::Error),

    /// The payload referenced a file that could not be read.
    #[error("failed to read job configuration {}: {source}", path.display())]
    Unreadable {
        /// Referenced file.
        path: PathBuf,
        /// Underlying failure.
        source: std::io::Error,
    },

    /// No task was defined.
    #[error("job configuration defines no tasks")]
    NoTasks,

    /// A task lacks a template file name.
    #[error("task {0} has no template file name")]
    MissingTemplate(usize),
}

/// Top-level render configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    /// Render tasks, each naming its own template.
    pub tasks: Vec<RenderTask>,
    /// Top-level fields passed through as given.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single render task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTask {
    /// General switches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general: Option<GeneralSettings>,
    /// Template and output settings.
    pub template: TemplateSettings,
    /// Connection to the backing application.
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Other task sections (`distribute`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// General task switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralSettings {
    /// Apply the caller's current selections.
    #[serde(default)]
    pub use_user_selections: bool,
    /// Other general switches.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Template and output settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSettings {
    /// Template path.
    #[serde(default)]
    pub file_name: String,
    /// Output formats, comma or semicolon separated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub save_formats: String,
    /// Report name used by the renderer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub report_name: String,
    /// Other template fields (`outputPath`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TemplateSettings {
    /// Output formats as a list (lowercase, trimmed, empty entries dropped).
    pub fn formats(&self) -> Vec<String> {
        parse_save_formats(&self.save_formats)
    }
}

/// Connection to the backing application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    /// Target application id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app: String,
    /// URI the renderer connects to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connect_uri: String,
    /// Virtual proxy path.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub virtual_proxy_path: String,
    /// Credentials the renderer authenticates with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<ConnectionCredentials>,
    /// Other connection fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Credential descriptor inside a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCredentials {
    /// Credential kind (`SESSION` for cookie reuse).
    #[serde(rename = "type")]
    pub kind: String,
    /// Cookie name.
    #[serde(default)]
    pub key: String,
    /// Cookie value.
    #[serde(default)]
    pub value: String,
    /// Other credential fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<&Credential> for ConnectionCredentials {
    fn from(credential: &Credential) -> Self {
        Self {
            kind: SESSION_CREDENTIAL_TYPE.to_string(),
            key: credential.name.clone(),
            value: credential.value.clone(),
            extra: Map::new(),
        }
    }
}

/// Connection details shared by every task of a job.
#[derive(Debug, Clone)]
pub struct ConnectionTarget<'a> {
    /// Target application id (empty when the call carried none).
    pub app_id: &'a str,
    /// URI the renderer connects to.
    pub connect_uri: String,
    /// Virtual proxy path.
    pub proxy_path: &'a str,
    /// Session credential.
    pub credential: &'a Credential,
}

/// Parameters of a CREATE call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParams {
    /// Template reference (absolute path or relative to the template root).
    pub template: String,
    /// Output formats.
    pub output_formats: String,
    /// Apply the caller's selections.
    pub use_selection: bool,
}

impl CreateParams {
    /// Build parameters from raw call values; the flag accepts `true`/`false`
    /// in any case and defaults to `false`.
    pub fn from_raw(template: &str, output_formats: &str, use_selection: &str) -> Self {
        Self {
            template: template.trim().to_string(),
            output_formats: output_formats.trim().to_string(),
            use_selection: parse_flag(use_selection),
        }
    }
}

/// Interpret a `"true"`/`"false"` parameter.
pub fn parse_flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

/// Split a save-format list.
pub fn parse_save_formats(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(|f| f.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

impl RenderConfig {
    /// Build a single-task configuration for a CREATE call.
    pub fn build(template_path: &Path, params: &CreateParams, target: &ConnectionTarget<'_>) -> Self {
        let report_name = template_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            tasks: vec![RenderTask {
                general: Some(GeneralSettings {
                    use_user_selections: params.use_selection,
                    extra: Map::new(),
                }),
                template: TemplateSettings {
                    file_name: template_path.to_string_lossy().into_owned(),
                    save_formats: params.output_formats.clone(),
                    report_name,
                    extra: Map::new(),
                },
                connection: ConnectionSettings {
                    app: target.app_id.to_string(),
                    connect_uri: target.connect_uri.clone(),
                    virtual_proxy_path: target.proxy_path.to_string(),
                    credentials: Some(ConnectionCredentials::from(target.credential)),
                    extra: Map::new(),
                },
                extra: Map::new(),
            }],
            extra: Map::new(),
        }
    }

    /// Parse and validate a configuration supplied by a caller, as JSON or
    /// Hjson.
    pub fn parse(raw: &str) -> Result<Self, ConfigValidationError> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => deser_hjson::from_str(raw)?,
        };
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve a START payload: a path ending in `.json`/`.hjson` is read from
    /// disk, anything else is an inline document.
    pub async fn from_inline_or_path(payload: &str) -> Result<Self, ConfigValidationError> {
        let payload = payload.trim();
        let lower = payload.to_ascii_lowercase();
        if lower.ends_with(".json") || lower.ends_with(".hjson") {
            let path = PathBuf::from(payload);
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ConfigValidationError::Unreadable { path, source })?;
            Self::parse(&raw)
        } else {
            Self::parse(payload)
        }
    }

    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.tasks.is_empty() {
            return Err(ConfigValidationError::NoTasks);
        }
        if let Some(index) = self
            .tasks
            .iter()
            .position(|task| task.template.file_name.trim().is_empty())
        {
            return Err(ConfigValidationError::MissingTemplate(index));
        }
        Ok(())
    }

    /// Template reference of every task, in task order.
    pub fn template_refs(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .map(|task| task.template.file_name.as_str())
            .collect()
    }

    /// Output formats of the first task.
    pub fn formats(&self) -> Vec<String> {
        self.tasks
            .first()
            .map(|task| task.template.formats())
            .unwrap_or_default()
    }

    /// Fill connection fields the caller left out.
    pub fn inject_connection(&mut self, target: &ConnectionTarget<'_>) {
        for task in &mut self.tasks {
            let connection = &mut task.connection;
            if connection.app.is_empty() {
                connection.app = target.app_id.to_string();
            }
            if connection.connect_uri.is_empty() {
                connection.connect_uri = target.connect_uri.clone();
            }
            if connection.virtual_proxy_path.is_empty() {
                connection.virtual_proxy_path = target.proxy_path.to_string();
            }
            if connection.credentials.is_none() {
                connection.credentials = Some(ConnectionCredentials::from(target.credential));
            }
        }
    }

    /// Point each task at its prepared template; `paths` is in task order.
    pub fn set_templates(&mut self, paths: &[PathBuf]) {
        for (task, path) in self.tasks.iter_mut().zip(paths) {
            task.template.file_name = path.to_string_lossy().into_owned();
        }
    }

    /// Persist as `job.json` inside `dir`.
    pub async fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(CONFIG_FILE_NAME);
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}
