// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading for plcwire.
//!
//! # Loading Pipeline
//!
//! 1. Read the YAML/TOML/JSON file
//! 2. Resolve `${VAR}` and `${VAR:default}` placeholders
//! 3. Parse into [`PlcConfig`]
//! 4. Apply environment variable overrides
//! 5. Validate engine settings and connection strings
//!
//! # Environment Variable Override
//!
//! ```text
//! PLCWIRE_REQUEST_TIMEOUT_MS=2000
//! PLCWIRE_CHANGE_OF_STATE_POLL_MS=100
//! PLCWIRE_SUBSCRIPTION_BUFFER=512
//! PLCWIRE_MAX_PENDING=4096
//! PLCWIRE_DUPLICATE_HISTORY=64
//! PLCWIRE_INBOUND_BUFFER=256
//! ```

use crate::error::{ConfigError, ConfigResult};
use crate::schema::PlcConfig;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader.
///
/// # Examples
///
/// ```no_run
/// use plcwire_config::loader::ConfigLoader;
///
/// let loader = ConfigLoader::new();
/// let config = loader.load("plcwire.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to resolve environment variables.
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            env_prefix: "PLCWIRE".to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from a file. The format follows the extension.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<PlcConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let format = ConfigFormat::from_path(path)?;

        let config = self.load_from_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })?;

        info!("Configuration loaded successfully");
        debug!(connections = config.connections.len(), "Loaded connections");
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<PlcConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        let mut config: PlcConfig = parse_str(&content, format)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolves `${VAR_NAME}` and `${VAR_NAME:default}` placeholders.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find('}') else {
                result.push_str(&rest[start..]);
                return result;
            };

            let var_content = &after[..end];
            let (var_name, default_value) = match var_content.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (var_content, None),
            };

            match (env::var(var_name), default_value) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(default)) => result.push_str(default),
                (Err(_), None) => {
                    warn!("Environment variable '{}' not found", var_name);
                    result.push_str(&rest[start..start + 2 + end + 1]);
                }
            }

            rest = &after[end + 1..];
        }

        result.push_str(rest);
        result
    }

    /// Applies environment variable overrides to the engine settings.
    fn apply_env_overrides(&self, config: &mut PlcConfig) -> ConfigResult<()> {
        if let Some(v) = self.env_override("REQUEST_TIMEOUT_MS")? {
            config.engine.request_timeout_ms = v;
        }
        if let Some(v) = self.env_override("CHANGE_OF_STATE_POLL_MS")? {
            config.engine.change_of_state_poll_ms = v;
        }
        if let Some(v) = self.env_override("SUBSCRIPTION_BUFFER")? {
            config.engine.subscription_buffer = v;
        }
        if let Some(v) = self.env_override("MAX_PENDING")? {
            config.engine.max_pending = v;
        }
        if let Some(v) = self.env_override("DUPLICATE_HISTORY")? {
            config.engine.duplicate_history = v;
        }
        if let Some(v) = self.env_override("INBOUND_BUFFER")? {
            config.engine.inbound_buffer = v;
        }
        Ok(())
    }

    fn env_override<T: FromStr>(&self, key: &str) -> ConfigResult<Option<T>> {
        let name = format!("{}_{}", self.env_prefix, key);
        match env::var(&name) {
            Ok(value) => {
                debug!(variable = %name, "Applying environment override");
                value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::invalid_env_var(name, "expected a non-negative integer"))
            }
            Err(_) => Ok(None),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a string based on format.
fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => serde_yaml_parse(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML parsing through the config crate.
fn serde_yaml_parse<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<PlcConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the specified format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<PlcConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOML: &str = r#"
[engine]
request_timeout_ms = 1500

[[connections]]
name = "press"
url = "ads:tcp://10.0.0.5?target-ams-net-id=10.0.0.5.1.1&target-ams-port=851"

[[connections]]
name = "hmi"
url = "opcua:tcp://127.0.0.1:12686/milo?discovery=true"
request_timeout_ms = 250
"#;

    const YAML: &str = r#"
engine:
  change_of_state_poll_ms: 100
connections:
  - name: drive
    url: "canopen:socketcan://can0?node-id=3"
"#;

    #[test]
    fn test_load_toml() {
        let loader = ConfigLoader::new().with_env_vars(false);
        let config = loader.load_from_str(TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(config.engine.request_timeout_ms, 1500);
        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.engine_for("hmi").unwrap().request_timeout_ms, 250);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = ConfigLoader::new().with_env_vars(false).load(file.path()).unwrap();
        assert_eq!(config.engine.change_of_state_poll_ms, 100);
        assert_eq!(config.get_connection("drive").unwrap().url, "canopen:socketcan://can0?node-id=3");
    }

    #[test]
    fn test_load_json() {
        let json = r#"{"connections":[{"name":"a","url":"ads:tcp://plc"}]}"#;
        let config = load_config_str(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.connections[0].name, "a");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml = "[engine]\nrequest_timeout = 5\n";
        let err = ConfigLoader::new()
            .with_env_vars(false)
            .load_from_str(toml, ConfigFormat::Toml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Serialization { .. }));
    }

    #[test]
    fn test_invalid_connection_rejected_on_load() {
        let toml = "[[connections]]\nname = \"ua\"\nurl = \"opcua:tcp://h?discovery=1\"\n";
        let err = load_config_str(toml, ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConnection { .. }));
    }

    #[test]
    fn test_env_override() {
        env::set_var("PLCWIRE_LOADER_TEST_MAX_PENDING", "77");
        let loader = ConfigLoader::new().with_env_prefix("PLCWIRE_LOADER_TEST");
        let config = loader.load_from_str("", ConfigFormat::Toml).unwrap();
        assert_eq!(config.engine.max_pending, 77);
        env::remove_var("PLCWIRE_LOADER_TEST_MAX_PENDING");
    }

    #[test]
    fn test_env_override_correlation_settings() {
        env::set_var("PLCWIRE_LOADER_CORR_DUPLICATE_HISTORY", "0");
        env::set_var("PLCWIRE_LOADER_CORR_INBOUND_BUFFER", "32");
        let loader = ConfigLoader::new().with_env_prefix("PLCWIRE_LOADER_CORR");
        let config = loader.load_from_str("", ConfigFormat::Toml).unwrap();
        assert_eq!(config.engine.duplicate_history, 0);
        assert_eq!(config.engine.inbound_buffer, 32);

        // overrides are validated like file values
        env::set_var("PLCWIRE_LOADER_CORR_INBOUND_BUFFER", "0");
        let err = loader.load_from_str("", ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
        env::remove_var("PLCWIRE_LOADER_CORR_DUPLICATE_HISTORY");
        env::remove_var("PLCWIRE_LOADER_CORR_INBOUND_BUFFER");
    }

    #[test]
    fn test_env_override_invalid() {
        env::set_var("PLCWIRE_LOADER_BAD_REQUEST_TIMEOUT_MS", "soon");
        let loader = ConfigLoader::new().with_env_prefix("PLCWIRE_LOADER_BAD");
        let err = loader.load_from_str("", ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));
        env::remove_var("PLCWIRE_LOADER_BAD_REQUEST_TIMEOUT_MS");
    }

    #[test]
    fn test_env_placeholder_with_default() {
        let loader = ConfigLoader::new();
        let result = loader.resolve_env_placeholders("url: ${PLCWIRE_NONEXISTENT_VAR:ads:tcp://plc}");
        assert_eq!(result, "url: ads:tcp://plc");

        let result = loader.resolve_env_placeholders("a ${PLCWIRE_NONEXISTENT_VAR} b");
        assert_eq!(result, "a ${PLCWIRE_NONEXISTENT_VAR} b");

        let result = loader.resolve_env_placeholders("open ${BROKEN");
        assert_eq!(result, "open ${BROKEN");
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("c.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("c.toml")).unwrap(), ConfigFormat::Toml);
        assert!(ConfigFormat::from_path(Path::new("c.txt")).is_err());
        assert!(ConfigFormat::from_path(Path::new("c")).is_err());
    }

    #[test]
    fn test_file_not_found() {
        let result = ConfigLoader::new().load("/nonexistent/path/plcwire.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }
}
