//! # Input Configuration
//!
//! Strictly typed configuration for the input. Every structure rejects unknown
//! keys, and `InputConfig::validate` checks the semantic constraints serde
//! cannot express, so a configuration that passes loading is safe to run.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use firebase_input::config::InputConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = InputConfig::from_yaml_str(
//!     r#"
//! url: https://example.firebaseio.com
//! refs:
//!   users:
//!     path: /users
//!     orderBy: $key
//!     limitToFirst: 10
//! schedule:
//!   every: 1h
//! "#,
//! )?;
//! assert!(config.schedule_spec()?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::constants::{defaults, fields};
use crate::schedule::ScheduleSpec;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

fn default_metadata_target() -> String {
    fields::METADATA.to_string()
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Database endpoint root
    pub url: String,

    /// Credential handed to the remote client
    #[serde(default)]
    pub secret: Option<String>,

    /// Named queries to retrieve
    pub refs: BTreeMap<String, RefConfig>,

    /// Field to nest retrieved data under; event root when absent
    #[serde(default)]
    pub target: Option<String>,

    /// Presence selects scheduled (pull) mode, absence streaming (push) mode
    #[serde(default)]
    pub schedule: Option<BTreeMap<String, ScheduleValue>>,

    /// Field for provenance metadata; empty disables the envelope
    #[serde(default = "default_metadata_target")]
    pub metadata_target: String,

    /// Host reported in metadata; system hostname when absent
    #[serde(default)]
    pub host: Option<String>,

    /// Remote client tuning
    #[serde(default)]
    pub client: ClientConfig,

    /// Output sink tuning
    #[serde(default)]
    pub sink: SinkConfig,
}

/// One entry of `refs`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RefConfig {
    pub path: String,

    #[serde(
        default,
        rename = "orderBy",
        skip_serializing_if = "Option::is_none"
    )]
    pub order_by: Option<String>,

    #[serde(
        default,
        rename = "limitToFirst",
        skip_serializing_if = "Option::is_none"
    )]
    pub limit_to_first: Option<i64>,
}

/// A schedule value: textual (`"1h"`, cron expression, timestamp) or a bare
/// number of seconds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ScheduleValue {
    Seconds(u64),
    Text(String),
}

impl ScheduleValue {
    pub fn as_text(&self) -> String {
        match self {
            ScheduleValue::Seconds(secs) => secs.to_string(),
            ScheduleValue::Text(text) => text.clone(),
        }
    }
}

/// Remote client configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClientConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub token_refresh_hours: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: defaults::FETCH_TIMEOUT_SECONDS,
            max_retries: defaults::MAX_RETRIES,
            retry_backoff_ms: defaults::RETRY_BACKOFF_MS,
            token_refresh_hours: defaults::TOKEN_REFRESH_HOURS,
            reconnect_delay_ms: defaults::RECONNECT_DELAY_MS,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_hours.saturating_mul(3600))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Output sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct SinkConfig {
    pub buffer_size: usize,
    pub enqueue_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_size: defaults::SINK_BUFFER_SIZE,
            enqueue_timeout_ms: defaults::SINK_ENQUEUE_TIMEOUT_MS,
        }
    }
}

impl SinkConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

impl InputConfig {
    /// Build and validate a configuration from an in-memory JSON value
    pub fn from_value(value: serde_json::Value) -> ConfigResult<Self> {
        let config: InputConfig = serde_json::from_value(value)
            .map_err(|e| ConfigurationError::parse_error("inline configuration", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Build and validate a configuration from a YAML document
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: InputConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigurationError::parse_error("YAML configuration", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate constraints that deserialization alone does not enforce
    pub fn validate(&self) -> ConfigResult<()> {
        if self.url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "url",
                "input configuration",
            ));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigurationError::invalid_value(
                "url",
                self.url.clone(),
                "must be an http:// or https:// endpoint",
            ));
        }

        if self.refs.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "refs",
                "input configuration (at least one query is required)",
            ));
        }

        for (name, reference) in &self.refs {
            if name.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "refs",
                    name.clone(),
                    "query names must not be empty",
                ));
            }
            if reference.path.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    format!("refs.{name}.path"),
                    reference.path.clone(),
                    "path must not be empty",
                ));
            }
            if let Some(limit) = reference.limit_to_first {
                if limit <= 0 {
                    return Err(ConfigurationError::invalid_value(
                        format!("refs.{name}.limitToFirst"),
                        limit.to_string(),
                        "must be a positive integer",
                    ));
                }
            }
            if matches!(&reference.order_by, Some(order) if order.trim().is_empty()) {
                return Err(ConfigurationError::invalid_value(
                    format!("refs.{name}.orderBy"),
                    "",
                    "must not be empty when given",
                ));
            }
        }

        if matches!(&self.target, Some(target) if target.trim().is_empty()) {
            return Err(ConfigurationError::invalid_value(
                "target",
                "",
                "must not be empty when given",
            ));
        }

        if self.sink.buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "sink.buffer_size",
                "0",
                "must be greater than zero",
            ));
        }
        if self.client.timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "client.timeout_seconds",
                "0",
                "must be greater than zero",
            ));
        }

        self.schedule_spec()?;
        Ok(())
    }

    /// The parsed schedule, or `None` when the input runs in streaming mode
    pub fn schedule_spec(&self) -> ConfigResult<Option<ScheduleSpec>> {
        match &self.schedule {
            None => Ok(None),
            Some(options) => {
                let options: BTreeMap<String, String> = options
                    .iter()
                    .map(|(kind, value)| (kind.clone(), value.as_text()))
                    .collect();
                ScheduleSpec::from_options(&options).map(Some)
            }
        }
    }

    /// Metadata field name, `None` when metadata is disabled
    pub fn metadata_field(&self) -> Option<&str> {
        let target = self.metadata_target.trim();
        (!target.is_empty()).then_some(target)
    }

    /// Host name reported in event metadata
    pub fn resolved_host(&self) -> String {
        self.host.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> serde_json::Value {
        json!({
            "url": "https://example.firebaseio.com",
            "refs": { "u": { "path": "/u" } }
        })
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = InputConfig::from_value(base()).unwrap();

        assert_eq!(config.metadata_target, "@metadata");
        assert_eq!(config.metadata_field(), Some("@metadata"));
        assert_eq!(config.client.timeout_seconds, 10);
        assert_eq!(config.client.token_refresh_hours, 23);
        assert_eq!(config.sink.buffer_size, 1000);
        assert!(config.target.is_none());
        assert!(config.schedule_spec().unwrap().is_none());
    }

    #[test]
    fn test_camel_case_ref_options() {
        let mut value = base();
        value["refs"]["u"] = json!({ "path": "/u", "orderBy": "$key", "limitToFirst": 5 });

        let config = InputConfig::from_value(value).unwrap();
        let reference = &config.refs["u"];
        assert_eq!(reference.order_by.as_deref(), Some("$key"));
        assert_eq!(reference.limit_to_first, Some(5));
    }

    #[test]
    fn test_rejects_unknown_top_level_field() {
        let mut value = base();
        value["interval"] = json!(60);

        let err = InputConfig::from_value(value).unwrap_err();
        assert!(matches!(err, ConfigurationError::ParseError { .. }));
    }

    #[test]
    fn test_rejects_non_map_ref() {
        let mut value = base();
        value["refs"]["u"] = json!("/u");

        assert!(InputConfig::from_value(value).is_err());
    }

    #[test]
    fn test_rejects_missing_url_and_empty_refs() {
        assert!(InputConfig::from_value(json!({ "refs": { "u": { "path": "/u" } } })).is_err());

        let err = InputConfig::from_value(json!({
            "url": "https://example.firebaseio.com",
            "refs": {}
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingRequiredField { .. }));
    }

    #[test]
    fn test_token_refresh_interval_saturates() {
        let mut value = base();
        value["client"] = json!({ "token_refresh_hours": u64::MAX });
        let config = InputConfig::from_value(value).unwrap();

        assert_eq!(
            config.client.token_refresh_interval(),
            Duration::from_secs(u64::MAX)
        );
        assert_eq!(
            ClientConfig::default().token_refresh_interval(),
            Duration::from_secs(23 * 3600)
        );
    }

    #[test]
    fn test_rejects_bad_ref_values() {
        let mut value = base();
        value["refs"]["u"] = json!({ "path": "" });
        assert!(InputConfig::from_value(value).is_err());

        let mut value = base();
        value["refs"]["u"] = json!({ "path": "/u", "limitToFirst": 0 });
        assert!(InputConfig::from_value(value).is_err());
    }

    #[test]
    fn test_schedule_selects_pull_mode() {
        let mut value = base();
        value["schedule"] = json!({ "every": "1h" });

        let config = InputConfig::from_value(value).unwrap();
        assert_eq!(
            config.schedule_spec().unwrap(),
            Some(ScheduleSpec::Every(Duration::from_secs(3600)))
        );
    }

    #[test]
    fn test_numeric_schedule_value_is_seconds() {
        let mut value = base();
        value["schedule"] = json!({ "in": 30 });

        let config = InputConfig::from_value(value).unwrap();
        assert_eq!(
            config.schedule_spec().unwrap(),
            Some(ScheduleSpec::In(Duration::from_secs(30)))
        );
    }

    #[test]
    fn test_invalid_schedule_is_configuration_error() {
        let mut value = base();
        value["schedule"] = json!({ "every": "1h", "cron": "* * * * *" });

        let err = InputConfig::from_value(value).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSchedule { .. }));
    }

    #[test]
    fn test_empty_metadata_target_disables_metadata() {
        let mut value = base();
        value["metadata_target"] = json!("");

        let config = InputConfig::from_value(value).unwrap();
        assert_eq!(config.metadata_field(), None);
    }

    #[test]
    fn test_yaml_configuration() {
        let config = InputConfig::from_yaml_str(
            r#"
url: http://localhost:9000
secret: s3cr3t
target: firebase
refs:
  users:
    path: /users
schedule:
  cron: "*/5 * * * *"
"#,
        )
        .unwrap();

        assert_eq!(config.target.as_deref(), Some("firebase"));
        assert!(matches!(
            config.schedule_spec().unwrap(),
            Some(ScheduleSpec::Cron { .. })
        ));
    }
}
