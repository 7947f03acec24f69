//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sample rate, batch sizes, timeouts)
//! - Validate endpoints (log shipping URL, trace collector URL, metrics listen address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TelemetryConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::TelemetryConfig;
use crate::observability::metrics::check_label_value;

/// A single semantic problem, keyed by the dotted field path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every semantic rule and report all violations.
pub fn validate_config(config: &TelemetryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::new("service.name", "must not be empty"));
    } else if let Err(reason) = check_label_value(&config.service.name) {
        errors.push(ValidationError::new("service.name", reason));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("expected \"pretty\" or \"json\", got {:?}", config.observability.log_format),
        ));
    }

    let rate = config.tracing.sample_rate;
    if !(0.0..=1.0).contains(&rate) {
        errors.push(ValidationError::new(
            "tracing.sample_rate",
            format!("must be between 0.0 and 1.0, got {}", rate),
        ));
    }

    if config.metrics.enabled {
        if config.metrics.listen_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "metrics.listen_address",
                format!("not a socket address: {}", config.metrics.listen_address),
            ));
        }
        if !config.metrics.endpoint.starts_with('/') {
            errors.push(ValidationError::new("metrics.endpoint", "must start with '/'"));
        }
    }

    let shipping = &config.log_shipping;
    if shipping.batch_interval_secs == 0 {
        errors.push(ValidationError::new(
            "log_shipping.batch_interval_secs",
            "must be greater than 0",
        ));
    }
    if shipping.max_batch_size == 0 {
        errors.push(ValidationError::new("log_shipping.max_batch_size", "must be greater than 0"));
    }
    if shipping.max_buffered_records == 0 {
        errors.push(ValidationError::new(
            "log_shipping.max_buffered_records",
            "must be greater than 0",
        ));
    }
    if shipping.max_batch_size > shipping.max_buffered_records {
        errors.push(ValidationError::new(
            "log_shipping.max_batch_size",
            "must not exceed log_shipping.max_buffered_records",
        ));
    }
    if shipping.timeout_secs == 0 {
        errors.push(ValidationError::new("log_shipping.timeout_secs", "must be greater than 0"));
    }
    if shipping.retry_base_delay_ms > shipping.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "log_shipping.retry_base_delay_ms",
            "must not exceed log_shipping.retry_max_delay_ms",
        ));
    }
    if shipping.enabled {
        check_http_url("log_shipping.url", &shipping.url, &mut errors);
    }
    if config.tracing.enabled {
        check_http_url("tracing.endpoint", &config.tracing.endpoint, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_http_url(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => {
            let message = format!("unsupported scheme {}", url.scheme());
            errors.push(ValidationError::new(field, message));
        }
        Err(e) => errors.push(ValidationError::new(field, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&TelemetryConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = TelemetryConfig::default();
        config.tracing.sample_rate = 1.5;
        config.log_shipping.enabled = true;
        config.log_shipping.url = "ftp://logs".to_string();
        config.log_shipping.max_batch_size = 0;
        config.metrics.listen_address = "not-an-address".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"tracing.sample_rate"));
        assert!(fields.contains(&"log_shipping.url"));
        assert!(fields.contains(&"log_shipping.max_batch_size"));
        assert!(fields.contains(&"metrics.listen_address"));
    }

    #[test]
    fn test_disabled_sections_skip_endpoint_checks() {
        let mut config = TelemetryConfig::default();
        config.metrics.enabled = false;
        config.metrics.listen_address = "nope".to_string();
        config.log_shipping.url = "nope".to_string();
        config.tracing.enabled = false;
        config.tracing.endpoint = "nope".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_trace_collector_endpoint_must_be_http() {
        let mut config = TelemetryConfig::default();
        config.tracing.endpoint = "grpc://collector:4317".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "tracing.endpoint");

        config.tracing.endpoint = "not a url".to_string();
        assert_eq!(validate_config(&config).unwrap_err()[0].field, "tracing.endpoint");
    }

    #[test]
    fn test_service_name_must_be_a_bounded_token() {
        let mut config = TelemetryConfig::default();
        config.service.name = "identity service".to_string();
        assert!(validate_config(&config).is_err());
    }
}
