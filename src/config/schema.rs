//! Configuration schema definitions.
//!
//! Every section has defaults so a minimal (or empty) TOML file is valid.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the telemetry layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service identity attached to every record and span.
    pub service: ServiceConfig,

    /// Process diagnostics (the `tracing` subscriber).
    pub observability: ObservabilityConfig,

    /// Metric families and the Prometheus exporter.
    pub metrics: MetricsConfig,

    /// Structured log record buffering and shipping.
    pub log_shipping: LogShippingConfig,

    /// Span recording and sampling.
    pub tracing: TracingConfig,
}

/// Service identity.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name (e.g., "identity-service").
    pub name: String,

    /// Deployment environment (e.g., "production").
    pub environment: String,

    /// Service version.
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "identity-service".to_string(),
            environment: "development".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Diagnostic logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Record metrics at all.
    pub enabled: bool,

    /// Address the Prometheus exporter listens on.
    pub listen_address: String,

    /// Scrape path advertised to the scraper. The embedded exporter answers
    /// on every path, so this only shapes the advertised scrape URL.
    pub endpoint: String,

    /// Record the business families (authentication, users, tokens, ...).
    pub business_metrics: bool,

    /// Record the database families.
    pub database_metrics: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: "0.0.0.0:9090".to_string(),
            endpoint: "/metrics".to_string(),
            business_metrics: true,
            database_metrics: true,
        }
    }
}

impl MetricsConfig {
    /// URL a scraper should be pointed at, e.g. `http://0.0.0.0:9090/metrics`.
    pub fn scrape_url(&self) -> String {
        format!("http://{}{}", self.listen_address, self.endpoint)
    }
}

/// Log shipping configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LogShippingConfig {
    /// Push batches to the log sink; when off, batches go to stdout as JSON lines.
    pub enabled: bool,

    /// Push endpoint (e.g., "http://loki:3100").
    pub url: String,

    /// Static stream labels.
    pub labels: BTreeMap<String, String>,

    /// Seconds between background flushes.
    pub batch_interval_secs: u64,

    /// Records per push; reaching it also wakes the flusher early.
    pub max_batch_size: usize,

    /// Buffer capacity; the oldest record is dropped when full.
    pub max_buffered_records: usize,

    /// Per-push timeout in seconds.
    pub timeout_secs: u64,

    /// Extra attempts after a failed push.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Retry delay cap in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for LogShippingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:3100".to_string(),
            labels: BTreeMap::new(),
            batch_interval_secs: 60,
            max_batch_size: 500,
            max_buffered_records: 10_000,
            timeout_secs: 10,
            max_retries: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
        }
    }
}

/// Span recording configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TracingConfig {
    /// Record spans; when off every span is a no-op and ids are absent.
    pub enabled: bool,

    /// Collector endpoint handed to the external span transport that drains
    /// the span buffer. Nothing in this crate connects to it.
    pub endpoint: String,

    /// Fraction of traces recorded, decided at the root span.
    pub sample_rate: f64,

    /// Also write finished spans to the diagnostic log.
    pub console_export: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:4317".to_string(),
            sample_rate: 1.0,
            console_export: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: TelemetryConfig = toml::from_str("").unwrap();
        assert_eq!(config, TelemetryConfig::default());
        assert_eq!(config.log_shipping.batch_interval_secs, 60);
        assert_eq!(config.tracing.sample_rate, 1.0);
    }

    #[test]
    fn test_partial_sections() {
        let config: TelemetryConfig = toml::from_str(
            r#"
            [tracing]
            enabled = false

            [log_shipping]
            enabled = true
            url = "http://loki:3100"
            labels = { team = "identity" }
            "#,
        )
        .unwrap();
        assert!(!config.tracing.enabled);
        assert_eq!(config.tracing.sample_rate, 1.0);
        assert_eq!(config.log_shipping.labels.get("team").map(String::as_str), Some("identity"));
        assert_eq!(config.log_shipping.max_retries, 3);
    }

    #[test]
    fn test_scrape_url() {
        let mut metrics = MetricsConfig::default();
        assert_eq!(metrics.scrape_url(), "http://0.0.0.0:9090/metrics");
        metrics.endpoint = "/internal/metrics".to_string();
        assert_eq!(metrics.scrape_url(), "http://0.0.0.0:9090/internal/metrics");
    }
}
