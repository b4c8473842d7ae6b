//! Configuration Module
//!
//! Loads the hub's YAML file, applies environment overrides and validates
//! the result.
//!
//! # File
//!
//! ```yaml
//! datasources:
//!   yahoo:
//!     symbols: [AAPL, MSFT]
//!     refresh_interval: 5s
//! service:
//!   buffer_size: 100
//!   ingress_capacity: 1000
//!   ingress_send_timeout: 1s
//!   shutdown_timeout: 5s
//! server:
//!   health_port: 8083
//! ```
//!
//! # Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `QUOTE_HUB_CONFIG` | Config file path (default `config.yaml`) |
//! | `QUOTE_HUB_BUFFER_SIZE` | Overrides `service.buffer_size` |
//! | `QUOTE_HUB_INGRESS_CAPACITY` | Overrides `service.ingress_capacity` |
//! | `QUOTE_HUB_HEALTH_PORT` | Overrides `server.health_port` |
//! | `QUOTE_HUB_YAHOO_BASE_URL` | Endpoint for sources without a `base_url` |

mod duration;
mod settings;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use duration::{format_duration, parse_duration};
pub use settings::{DataSourceSettings, ServerSettings, ServiceSettings};

/// Config file read when `QUOTE_HUB_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse the YAML.
    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// A value is out of range.
    #[error("config validation failed: {0}")]
    ValidationError(String),

    /// An environment override could not be parsed.
    #[error("invalid value '{value}' for {key}")]
    InvalidEnvVar {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteHubConfig {
    /// Polled sources by name.
    #[serde(default)]
    pub datasources: BTreeMap<String, DataSourceSettings>,
    /// Hub tuning.
    #[serde(default)]
    pub service: ServiceSettings,
    /// Server ports.
    #[serde(default)]
    pub server: ServerSettings,
}

impl QuoteHubConfig {
    /// Load the file named by `QUOTE_HUB_CONFIG` and apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or parsed, an
    /// override is malformed, or the result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path =
            std::env::var("QUOTE_HUB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = load_config(Some(&path))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Apply overrides looked up by variable name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEnvVar` if a numeric override does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_override(&lookup, "QUOTE_HUB_BUFFER_SIZE")? {
            self.service.buffer_size = value;
        }
        if let Some(value) = parse_override(&lookup, "QUOTE_HUB_INGRESS_CAPACITY")? {
            self.service.ingress_capacity = value;
        }
        if let Some(value) = parse_override(&lookup, "QUOTE_HUB_HEALTH_PORT")? {
            self.server.health_port = value;
        }
        if let Some(base_url) = lookup("QUOTE_HUB_YAHOO_BASE_URL").filter(|v| !v.is_empty()) {
            for source in self.datasources.values_mut() {
                source.base_url.get_or_insert_with(|| base_url.clone());
            }
        }
        Ok(())
    }
}

fn parse_override<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnvVar {
            key: key.to_string(),
            value,
        })
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Load configuration from a YAML file.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to `config.yaml`.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<QuoteHubConfig, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = std::fs::read_to_string(Path::new(path)).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_str(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_str(yaml: &str) -> Result<QuoteHubConfig, ConfigError> {
    let config: QuoteHubConfig = serde_yaml_bw::from_str(yaml)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &QuoteHubConfig) -> Result<(), ConfigError> {
    if config.service.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "service.buffer_size must be positive".to_string(),
        ));
    }

    if config.service.ingress_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "service.ingress_capacity must be positive".to_string(),
        ));
    }

    if config.service.ingress_send_timeout.is_zero() {
        return Err(ConfigError::ValidationError(
            "service.ingress_send_timeout must be positive".to_string(),
        ));
    }

    for (name, source) in &config.datasources {
        if source.symbols.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "datasources.{name}.symbols must name at least one symbol"
            )));
        }
        if source.refresh_interval.is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "datasources.{name}.refresh_interval must be positive"
            )));
        }
    }

    Ok(())
}
