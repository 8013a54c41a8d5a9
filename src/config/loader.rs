//! Configuration Loader
//!
//! Environment-aware configuration loading. A YAML or TOML file (format chosen
//! by extension) is layered with `FIREBASE_INPUT__*` environment overrides,
//! deserialized into `InputConfig` and validated before anything else runs.
//! Query names under `refs` are taken from the file verbatim and are not
//! subject to environment overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::InputConfig;
use crate::constants::defaults;
use crate::logging::resolve_environment;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded, validated configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: InputConfig,
    environment: String,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_with_env(path, &environment)
    }

    /// Load configuration with an explicit environment name
    pub fn load_with_env<P: AsRef<Path>>(
        path: P,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_path = path.as_ref().to_path_buf();

        debug!(
            "Loading configuration for environment '{}' from: {}",
            environment,
            config_path.display()
        );

        if !config_path.is_file() {
            return Err(ConfigurationError::config_file_not_found(config_path));
        }

        let source_name = config_path.display().to_string();
        let mut document = Self::read_document(&config_path, &source_name)?;

        // The layering crate lowercases map keys, so query names bypass it
        let refs = match document.as_object_mut() {
            Some(root) => root.remove("refs"),
            None => {
                return Err(ConfigurationError::parse_error(
                    source_name,
                    "top level must be a mapping",
                ))
            }
        };

        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                &document.to_string(),
                config::FileFormat::Json,
            ))
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::parse_error(source_name.clone(), e))?;

        let mut layered: serde_json::Map<String, serde_json::Value> = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::parse_error(source_name.clone(), e))?;
        if let Some(refs) = refs {
            layered.insert("refs".to_string(), refs);
        }

        let config: InputConfig = serde_json::from_value(serde_json::Value::Object(layered))
            .map_err(|e| ConfigurationError::parse_error(source_name.clone(), e))?;

        config.validate()?;

        debug!(
            "Configuration loaded: {}",
            serde_json::to_string(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = %environment,
            config_path = %config_path.display(),
            refs = config.refs.len(),
            scheduled = config.schedule.is_some(),
            "⚙️ CONFIG: Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_path,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: InputConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_path: PathBuf::new(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    /// Get the environment the configuration was loaded for
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the file the configuration was loaded from
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Configuration as JSON with sensitive fields masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Detect the current environment from well-known variables
    pub fn detect_environment() -> String {
        resolve_environment(
            env::var("FIREBASE_INPUT_ENV").ok(),
            env::var("APP_ENV").ok(),
        )
    }

    /// Parse the file by extension, keeping every key exactly as written
    fn read_document(path: &Path, source_name: &str) -> ConfigResult<serde_json::Value> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(source_name, e))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("yaml" | "yml") => serde_yaml::from_str(&contents)
                .map_err(|e| ConfigurationError::parse_error(source_name, e)),
            Some("toml") => {
                toml::from_str(&contents).map_err(|e| ConfigurationError::parse_error(source_name, e))
            }
            Some("json") => serde_json::from_str(&contents)
                .map_err(|e| ConfigurationError::parse_error(source_name, e)),
            other => Err(ConfigurationError::parse_error(
                source_name,
                format!(
                    "unsupported configuration format '{}'",
                    other.unwrap_or_default()
                ),
            )),
        }
    }

    fn sanitize_config_for_logging(config: &InputConfig) -> serde_json::Value {
        let mut config_json = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        let sensitive_patterns = ["password", "secret", "key", "token", "credential", "auth"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive && !val.is_null() && !val.is_object() {
                        *val = serde_json::Value::String("***REDACTED***".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}
