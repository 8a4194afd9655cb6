//! Configuration Module
//!
//! Loads the YAML configuration with environment variable interpolation
//! and validates it before anything connects.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kucoin_ingest::infrastructure::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("deploy/config.yaml"))?;
//! ```

mod settings;

use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;

pub use settings::{
    AppConfig, ConnectionConfig, ElasticSearchSettings, MySqlSettings, RestSettings, RetryConfig,
    TerminalSettings, VenueSettings, WebSocketSettings,
};

use crate::domain::market::SinkKind;
use crate::domain::subscription::ConfigIndex;

/// Default configuration path.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: AppConfig = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. An unset or empty
/// variable without a default becomes an empty string.
fn interpolate_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

    let Some(re) = ENV_VAR_REGEX
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
    else {
        return input.to_string();
    };

    re.replace_all(input, |caps: &Captures<'_>| {
        let default_value = caps.get(2).map_or("", |m| m.as_str());
        match std::env::var(&caps[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    ConfigIndex::build(&config.markets)
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    let connection = &config.connection;

    if connection.queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "connection.queue_capacity must be at least 1".to_string(),
        ));
    }
    if connection.websocket.connect_timeout_sec == 0 {
        return Err(ConfigError::ValidationError(
            "connection.websocket.connect_timeout_sec must be at least 1".to_string(),
        ));
    }
    if connection.rest.request_timeout_sec == 0 {
        return Err(ConfigError::ValidationError(
            "connection.rest.request_timeout_sec must be at least 1".to_string(),
        ));
    }
    if connection.venue.subscribe_burst == 0 {
        return Err(ConfigError::ValidationError(
            "connection.venue.subscribe_burst must be at least 1".to_string(),
        ));
    }
    if !connection.venue.rest_base_url.ends_with('/') {
        return Err(ConfigError::ValidationError(
            "connection.venue.rest_base_url must end with '/'".to_string(),
        ));
    }
    if connection.terminal.ticker_commit_buf == 0 || connection.terminal.trade_commit_buf == 0 {
        return Err(ConfigError::ValidationError(
            "connection.terminal commit buffers must be at least 1".to_string(),
        ));
    }

    if let Some(es) = &connection.elastic_search {
        if es.url.is_empty() || es.index_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "connection.elastic_search.url and index_name are required".to_string(),
            ));
        }
        if es.request_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "connection.elastic_search.request_timeout_sec must be at least 1".to_string(),
            ));
        }
        if es.ticker_commit_buf == 0 || es.trade_commit_buf == 0 {
            return Err(ConfigError::ValidationError(
                "connection.elastic_search commit buffers must be at least 1".to_string(),
            ));
        }
    }

    if let Some(mysql) = &connection.mysql {
        if mysql.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "connection.mysql.url is required".to_string(),
            ));
        }
        if mysql.connect_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "connection.mysql.connect_timeout_sec must be at least 1".to_string(),
            ));
        }
        if mysql.ticker_commit_buf == 0 || mysql.trade_commit_buf == 0 {
            return Err(ConfigError::ValidationError(
                "connection.mysql commit buffers must be at least 1".to_string(),
            ));
        }
    }

    if uses_sink(config, SinkKind::ElasticSearch) && connection.elastic_search.is_none() {
        return Err(ConfigError::ValidationError(
            "a market uses elastic_search but connection.elastic_search is missing".to_string(),
        ));
    }
    if uses_sink(config, SinkKind::MySql) && connection.mysql.is_none() {
        return Err(ConfigError::ValidationError(
            "a market uses mysql but connection.mysql is missing".to_string(),
        ));
    }

    Ok(())
}

fn uses_sink(config: &AppConfig, kind: SinkKind) -> bool {
    config
        .markets
        .iter()
        .flat_map(|market| &market.channels)
        .any(|info| info.sinks.contains(&kind))
}

// =============================================================================
// Tests
// =============================================================================
