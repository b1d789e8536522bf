// SPDX-License-Identifier: Apache-2.0

//! YAML configuration parser with strict schema validation.
//!
//! Validates daemon settings and function definitions at boot-up time.
//! Any invalid field results in a HardValidationError that prevents startup.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{EmberError, EmberResult, HardValidationError};
use crate::types::{FunctionName, Port};

/// Raw function definition as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawFunctionConfig {
    name: String,
    image: String,
    #[serde(default)]
    environment: HashMap<String, String>,
}

/// Raw daemon configuration.
#[derive(Debug, Deserialize)]
struct RawDaemonConfig {
    #[serde(default = "default_network")]
    network: String,
    /// URL the backends use to call back into this deployment's front door.
    /// Required: a function advertised as reachable must be able to call back.
    callback_url: Option<String>,
    #[serde(default = "default_invoke_port")]
    invoke_port: u16,
    #[serde(default = "default_readiness_timeout")]
    readiness_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    sweep_interval_secs: u64,
    #[serde(default = "default_failure_threshold")]
    failure_threshold: u32,
    #[serde(default = "default_recovery_timeout")]
    recovery_timeout_secs: u64,
    #[serde(default = "default_invoke_timeout")]
    invoke_timeout_secs: u64,
    #[serde(default = "default_lock_timeout")]
    lock_timeout_secs: u64,
}

fn default_network() -> String {
    "bridge".to_string()
}

fn default_invoke_port() -> u16 {
    8080
}

fn default_readiness_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    900 // 15 minutes
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    30
}

fn default_invoke_timeout() -> u64 {
    300
}

fn default_lock_timeout() -> u64 {
    120
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    daemon: RawDaemonConfig,
    functions: Vec<RawFunctionConfig>,
}

/// Validated function definition.
#[derive(Debug, Clone)]
pub struct FunctionConfig {
    pub name: FunctionName,
    pub image: String,
    pub environment: HashMap<String, String>,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub network: String,
    pub callback_url: String,
    pub invoke_port: Port,
    pub readiness_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub invoke_timeout_secs: u64,
    pub lock_timeout_secs: u64,
}

/// Complete validated configuration.
#[derive(Debug)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub functions: Vec<FunctionConfig>,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> EmberResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(EmberError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| EmberError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> EmberResult<Config> {
        let raw: RawConfig = serde_yaml::from_str(content).map_err(|e| EmberError::ConfigParse {
            message: format!("YAML parse error: {}", e),
        })?;

        Self::validate(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig) -> EmberResult<Config> {
        let daemon = Self::validate_daemon(raw.daemon)?;

        let mut functions = Vec::with_capacity(raw.functions.len());
        let mut seen_names = std::collections::HashSet::new();

        for raw_func in raw.functions {
            let func = Self::validate_function(raw_func)?;

            if !seen_names.insert(func.name.clone()) {
                return Err(HardValidationError::DuplicateFunction {
                    name: func.name.to_string(),
                }
                .into());
            }

            functions.push(func);
        }

        Ok(Config { daemon, functions })
    }

    fn validate_daemon(raw: RawDaemonConfig) -> EmberResult<DaemonConfig> {
        let callback_url =
            raw.callback_url
                .ok_or_else(|| HardValidationError::MissingRequiredField {
                    field: "callback_url",
                    context: "daemon section".to_string(),
                })?;

        if !callback_url.starts_with("http://") && !callback_url.starts_with("https://") {
            return Err(HardValidationError::InvalidFieldValue {
                field: "callback_url",
                value: callback_url,
                reason: "Callback URL must be an http:// or https:// URL".to_string(),
            }
            .into());
        }

        if raw.network.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "network",
                value: raw.network,
                reason: "Network name cannot be empty".to_string(),
            }
            .into());
        }

        if raw.failure_threshold == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "failure_threshold",
                value: raw.failure_threshold.to_string(),
                reason: "Failure threshold must be at least 1".to_string(),
            }
            .into());
        }

        Ok(DaemonConfig {
            network: raw.network,
            callback_url,
            invoke_port: Port::new(raw.invoke_port)?,
            readiness_timeout_secs: raw.readiness_timeout_secs,
            idle_timeout_secs: raw.idle_timeout_secs,
            sweep_interval_secs: raw.sweep_interval_secs,
            failure_threshold: raw.failure_threshold,
            recovery_timeout_secs: raw.recovery_timeout_secs,
            invoke_timeout_secs: raw.invoke_timeout_secs,
            lock_timeout_secs: raw.lock_timeout_secs,
        })
    }

    fn validate_function(raw: RawFunctionConfig) -> EmberResult<FunctionConfig> {
        let name = FunctionName::new(raw.name)?;

        if raw.image.is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "image",
                context: format!("function '{}'", name),
            }
            .into());
        }

        Ok(FunctionConfig {
            name,
            image: raw.image,
            environment: raw.environment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
daemon:
  network: emberless-net
  callback_url: http://gateway:8080

functions:
  - name: thumbnailer
    image: thumbnailer:latest
    environment:
      LOG_LEVEL: debug
  - name: resize
    image: resize:latest
"#;

    #[test]
    fn test_load_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();

        assert_eq!(config.daemon.network, "emberless-net");
        assert_eq!(config.daemon.callback_url, "http://gateway:8080");
        assert_eq!(config.functions.len(), 2);
        assert_eq!(config.functions[0].name.as_str(), "thumbnailer");
        assert_eq!(
            config.functions[0].environment.get("LOG_LEVEL"),
            Some(&"debug".to_string())
        );
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();

        assert_eq!(config.daemon.invoke_port.value(), 8080);
        assert_eq!(config.daemon.readiness_timeout_secs, 30);
        assert_eq!(config.daemon.idle_timeout_secs, 900);
        assert_eq!(config.daemon.failure_threshold, 5);
    }

    #[test]
    fn test_missing_callback_url_rejected() {
        let content = r#"
daemon:
  network: emberless-net
functions: []
"#;
        let err = ConfigLoader::load_string(content).unwrap_err();
        assert!(matches!(
            err,
            EmberError::HardValidation(HardValidationError::MissingRequiredField {
                field: "callback_url",
                ..
            })
        ));
    }

    #[test]
    fn test_non_http_callback_url_rejected() {
        let content = r#"
daemon:
  callback_url: gateway:8080
functions: []
"#;
        assert!(ConfigLoader::load_string(content).is_err());
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let content = r#"
daemon:
  callback_url: http://gateway:8080
functions:
  - name: thumbnailer
    image: a:latest
  - name: thumbnailer
    image: b:latest
"#;
        let err = ConfigLoader::load_string(content).unwrap_err();
        assert!(matches!(
            err,
            EmberError::HardValidation(HardValidationError::DuplicateFunction { .. })
        ));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let content = r#"
daemon:
  callback_url: http://gateway:8080
  invoke_port: 0
functions: []
"#;
        let err = ConfigLoader::load_string(content).unwrap_err();
        assert!(matches!(
            err,
            EmberError::HardValidation(HardValidationError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_missing_image_rejected() {
        let content = r#"
daemon:
  callback_url: http://gateway:8080
functions:
  - name: thumbnailer
    image: ""
"#;
        assert!(ConfigLoader::load_string(content).is_err());
    }

    #[test]
    fn test_config_file_not_found() {
        let err = ConfigLoader::load_file("/nonexistent/emberless.yaml").unwrap_err();
        assert!(matches!(err, EmberError::ConfigNotFound { .. }));
    }
}
