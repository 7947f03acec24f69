//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::TelemetryConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "IDENTITY_TELEMETRY_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    Override { key: String, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<TelemetryConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: TelemetryConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load from `path` (or defaults), apply process environment overrides, then validate.
pub fn load_with_env(path: Option<&Path>) -> Result<TelemetryConfig, ConfigError> {
    let config: TelemetryConfig = match path {
        Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
        None => TelemetryConfig::default(),
    };
    let config = apply_overrides(config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `IDENTITY_TELEMETRY_*` overrides read through `lookup`.
pub fn apply_overrides<F>(
    mut config: TelemetryConfig,
    lookup: F,
) -> Result<TelemetryConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |suffix: &str| {
        let key = format!("{}{}", ENV_PREFIX, suffix);
        lookup(&key).map(|v| (key, v))
    };

    if let Some((_, v)) = get("SERVICE_NAME") {
        config.service.name = v;
    }
    if let Some((_, v)) = get("ENVIRONMENT") {
        config.service.environment = v;
    }
    if let Some((key, v)) = get("METRICS_ENABLED") {
        config.metrics.enabled = parse_bool(&key, &v)?;
    }
    if let Some((key, v)) = get("TRACING_ENABLED") {
        config.tracing.enabled = parse_bool(&key, &v)?;
    }
    if let Some((key, v)) = get("LOG_SHIPPING_ENABLED") {
        config.log_shipping.enabled = parse_bool(&key, &v)?;
    }
    if let Some((_, v)) = get("LOG_SHIPPING_URL") {
        config.log_shipping.url = v;
    }
    if let Some((key, v)) = get("SAMPLE_RATE") {
        config.tracing.sample_rate = v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Override { key, value: v.clone() })?;
    }
    Ok(config)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Override {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
