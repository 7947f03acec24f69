//! Metric registry and per-kind metric families.
//!
//! # Responsibilities
//! - Hold every counter, gauge and histogram series with a bounded label set
//! - Reject high-cardinality label values at the call site
//! - Map settled outcomes to the metric families of each operation kind
//! - Forward every update to the `metrics` facade for Prometheus export
//!
//! # Design Decisions
//! - Series live in a `DashMap`; counters and gauges are atomics, histogram
//!   buckets sit behind a per-series mutex, so concurrent updates are never lost
//! - The registry snapshot is the in-process pull path; the scrape endpoint is
//!   served by `metrics-exporter-prometheus` from the facade
//! - Label keys come from a fixed allow-list; values must be short tokens and
//!   may never look like an email address or a UUID

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use serde::Serialize;
use thiserror::Error;

use crate::observability::descriptor::{
    OperationDescriptor, OperationKind, OperationOutcome, OutcomeStatus,
};
use crate::observability::privacy::{is_email_shaped, looks_like_uuid};
use crate::observability::sink::{OutcomeSink, Recording, SinkError};

// Business families
pub const AUTHENTICATION_ATTEMPTS_TOTAL: &str = "authentication_attempts_total";
pub const AUTHENTICATION_DURATION_SECONDS: &str = "authentication_duration_seconds";
pub const FAILED_LOGIN_ATTEMPTS_TOTAL: &str = "failed_login_attempts_total";
pub const USER_OPERATIONS_TOTAL: &str = "user_operations_total";
pub const USER_REGISTRATION_DURATION_SECONDS: &str = "user_registration_duration_seconds";
pub const PASSWORD_OPERATIONS_TOTAL: &str = "password_operations_total";
pub const TOKEN_OPERATIONS_TOTAL: &str = "token_operations_total";
pub const TOKEN_GENERATION_DURATION_SECONDS: &str = "token_generation_duration_seconds";
pub const TOKEN_EXPIRATION_SECONDS: &str = "token_expiration_seconds";
pub const PERMISSION_CHECKS_TOTAL: &str = "permission_checks_total";
pub const PERMISSION_CHECK_DURATION_SECONDS: &str = "permission_check_duration_seconds";
pub const SECURITY_EVENTS_TOTAL: &str = "security_events_total";

// Database families
pub const DATABASE_OPERATIONS_TOTAL: &str = "database_operations_total";
pub const DATABASE_OPERATION_DURATION_SECONDS: &str = "database_operation_duration_seconds";
pub const DATABASE_CONNECTIONS_ACTIVE: &str = "database_connections_active";
pub const ACTIVE_SESSIONS: &str = "active_sessions";

// Internal
pub const SINK_FAILURES_TOTAL: &str = "observability_sink_failures_total";
pub const LOG_EXPORT_FAILURES_TOTAL: &str = "log_export_failures_total";
pub const LOG_RECORDS_DROPPED_TOTAL: &str = "log_records_dropped_total";
pub const UNINSTRUMENTED_CANCELLATIONS_TOTAL: &str = "uninstrumented_cancellations_total";
pub const DATABASE_SESSIONS_LEAKED_TOTAL: &str = "database_sessions_leaked_total";

const AUTH_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0];
const REGISTRATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0];
const FAST_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];
const TOKEN_EXPIRATION_BUCKETS: &[f64] = &[
    300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0, 86400.0, 604800.0,
];
const DATABASE_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];
const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

const HISTOGRAMS: &[&str] = &[
    AUTHENTICATION_DURATION_SECONDS,
    USER_REGISTRATION_DURATION_SECONDS,
    TOKEN_GENERATION_DURATION_SECONDS,
    TOKEN_EXPIRATION_SECONDS,
    DATABASE_OPERATION_DURATION_SECONDS,
    PERMISSION_CHECK_DURATION_SECONDS,
];

/// Label keys a series may carry.
pub const ALLOWED_LABEL_KEYS: &[&str] = &[
    "auth_type",
    "status",
    "reason",
    "operation_type",
    "token_type",
    "table",
    "resource",
    "action",
    "result",
    "event_type",
    "severity",
    "sink",
];

pub const MAX_LABEL_VALUE_LEN: usize = 64;

/// Bucket upper bounds for a histogram family.
pub fn buckets_for(name: &str) -> &'static [f64] {
    match name {
        AUTHENTICATION_DURATION_SECONDS => AUTH_BUCKETS,
        USER_REGISTRATION_DURATION_SECONDS => REGISTRATION_BUCKETS,
        TOKEN_GENERATION_DURATION_SECONDS | PERMISSION_CHECK_DURATION_SECONDS => FAST_BUCKETS,
        TOKEN_EXPIRATION_SECONDS => TOKEN_EXPIRATION_BUCKETS,
        DATABASE_OPERATION_DURATION_SECONDS => DATABASE_BUCKETS,
        _ => DEFAULT_BUCKETS,
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricsError {
    #[error("label key '{key}' is not allowed on {metric}")]
    UnknownLabelKey { metric: String, key: String },

    #[error("label {key} on {metric} has an unbounded value: {reason}")]
    UnboundedLabel {
        metric: String,
        key: String,
        reason: &'static str,
    },

    #[error("{metric} is already registered as a {existing}")]
    TypeMismatch { metric: String, existing: &'static str },

    #[error("failed to install Prometheus exporter: {0}")]
    Exporter(String),
}

/// Check a label value against the cardinality policy.
pub fn check_label_value(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("empty value");
    }
    if value.len() > MAX_LABEL_VALUE_LEN {
        return Err("value too long");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '/' | '-'))
    {
        return Err("value contains free text characters");
    }
    if is_email_shaped(value) {
        return Err("value looks like an email address");
    }
    if looks_like_uuid(value) {
        return Err("value looks like an identifier");
    }
    Ok(())
}

/// Replace a value that fails the policy with `other`.
pub fn bounded_or_other(value: &str) -> &str {
    if check_label_value(value).is_ok() {
        value
    } else {
        "other"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: &'static str,
    labels: Vec<(String, String)>,
}

#[derive(Debug)]
struct HistogramState {
    bounds: &'static [f64],
    /// Per-bucket counts, one extra slot for `+Inf`.
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl HistogramState {
    fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            counts: vec![0; bounds.len() + 1],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());
        self.counts[idx] += 1;
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug)]
enum Series {
    Counter(AtomicU64),
    Gauge(AtomicI64),
    Histogram(Mutex<HistogramState>),
}

impl Series {
    fn type_name(&self) -> &'static str {
        match self {
            Series::Counter(_) => "counter",
            Series::Gauge(_) => "gauge",
            Series::Histogram(_) => "histogram",
        }
    }
}

/// Thread-safe store of metric series.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    series: DashMap<SeriesKey, Series>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(
        &self,
        name: &'static str,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        self.add_counter(name, labels, 1)
    }

    pub fn add_counter(
        &self,
        name: &'static str,
        labels: &[(&str, &str)],
        value: u64,
    ) -> Result<(), MetricsError> {
        let key = Self::key(name, labels)?;
        let facade_labels = Self::facade_labels(&key);
        self.with_series(
            key,
            || Series::Counter(AtomicU64::new(0)),
            |series| match series {
                Series::Counter(c) => {
                    c.fetch_add(value, Ordering::Relaxed);
                    Ok(())
                }
                other => Err(MetricsError::TypeMismatch {
                    metric: name.to_string(),
                    existing: other.type_name(),
                }),
            },
        )?;
        metrics::counter!(name, facade_labels).increment(value);
        Ok(())
    }

    pub fn observe_histogram(
        &self,
        name: &'static str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<(), MetricsError> {
        let key = Self::key(name, labels)?;
        let facade_labels = Self::facade_labels(&key);
        self.with_series(
            key,
            || Series::Histogram(Mutex::new(HistogramState::new(buckets_for(name)))),
            |series| match series {
                Series::Histogram(h) => {
                    h.lock().unwrap_or_else(PoisonError::into_inner).observe(value);
                    Ok(())
                }
                other => Err(MetricsError::TypeMismatch {
                    metric: name.to_string(),
                    existing: other.type_name(),
                }),
            },
        )?;
        metrics::histogram!(name, facade_labels).record(value);
        Ok(())
    }

    /// Adjust a gauge by `delta` (negative to decrement).
    pub fn gauge_add(
        &self,
        name: &'static str,
        labels: &[(&str, &str)],
        delta: i64,
    ) -> Result<(), MetricsError> {
        let key = Self::key(name, labels)?;
        let facade_labels = Self::facade_labels(&key);
        self.with_series(
            key,
            || Series::Gauge(AtomicI64::new(0)),
            |series| match series {
                Series::Gauge(g) => {
                    g.fetch_add(delta, Ordering::Relaxed);
                    Ok(())
                }
                other => Err(MetricsError::TypeMismatch {
                    metric: name.to_string(),
                    existing: other.type_name(),
                }),
            },
        )?;
        let gauge = metrics::gauge!(name, facade_labels);
        if delta >= 0 {
            gauge.increment(delta as f64);
        } else {
            gauge.decrement(delta.unsigned_abs() as f64);
        }
        Ok(())
    }

    pub fn gauge_set(
        &self,
        name: &'static str,
        labels: &[(&str, &str)],
        value: i64,
    ) -> Result<(), MetricsError> {
        let key = Self::key(name, labels)?;
        let facade_labels = Self::facade_labels(&key);
        self.with_series(
            key,
            || Series::Gauge(AtomicI64::new(0)),
            |series| match series {
                Series::Gauge(g) => {
                    g.store(value, Ordering::Relaxed);
                    Ok(())
                }
                other => Err(MetricsError::TypeMismatch {
                    metric: name.to_string(),
                    existing: other.type_name(),
                }),
            },
        )?;
        metrics::gauge!(name, facade_labels).set(value as f64);
        Ok(())
    }

    /// Unlabelled internal counter; these names are constants so this cannot fail.
    pub fn increment_internal(&self, name: &'static str) {
        if let Err(e) = self.increment_counter(name, &[]) {
            tracing::debug!(metric = name, error = %e, "Internal counter rejected");
        }
    }

    /// Point-in-time copy of every series.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut series: Vec<SeriesSnapshot> = self
            .series
            .iter()
            .map(|entry| {
                let key = entry.key();
                let value = match entry.value() {
                    Series::Counter(c) => SeriesValue::Counter {
                        value: c.load(Ordering::Relaxed),
                    },
                    Series::Gauge(g) => SeriesValue::Gauge {
                        value: g.load(Ordering::Relaxed),
                    },
                    Series::Histogram(h) => {
                        let state = h.lock().unwrap_or_else(PoisonError::into_inner);
                        let mut cumulative = 0;
                        let buckets = state
                            .bounds
                            .iter()
                            .zip(state.counts.iter())
                            .map(|(bound, count)| {
                                cumulative += count;
                                HistogramBucket {
                                    le: *bound,
                                    count: cumulative,
                                }
                            })
                            .collect();
                        SeriesValue::Histogram {
                            count: state.count,
                            sum: state.sum,
                            buckets,
                        }
                    }
                };
                SeriesSnapshot {
                    name: key.name.to_string(),
                    labels: key.labels.iter().cloned().collect(),
                    value,
                }
            })
            .collect();
        series.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        MetricsSnapshot { series }
    }

    fn key(name: &'static str, labels: &[(&str, &str)]) -> Result<SeriesKey, MetricsError> {
        let mut validated = Vec::with_capacity(labels.len());
        for (key, value) in labels {
            if !ALLOWED_LABEL_KEYS.contains(key) {
                return Err(MetricsError::UnknownLabelKey {
                    metric: name.to_string(),
                    key: key.to_string(),
                });
            }
            check_label_value(value).map_err(|reason| MetricsError::UnboundedLabel {
                metric: name.to_string(),
                key: key.to_string(),
                reason,
            })?;
            validated.push((key.to_string(), value.to_string()));
        }
        validated.sort();
        Ok(SeriesKey { name, labels: validated })
    }

    fn facade_labels(key: &SeriesKey) -> Vec<metrics::Label> {
        key.labels
            .iter()
            .map(|(k, v)| metrics::Label::new(k.clone(), v.clone()))
            .collect()
    }

    fn with_series<R>(
        &self,
        key: SeriesKey,
        make: impl FnOnce() -> Series,
        f: impl FnOnce(&Series) -> R,
    ) -> R {
        if let Some(existing) = self.series.get(&key) {
            return f(existing.value());
        }
        let entry = self.series.entry(key).or_insert_with(make);
        f(entry.value())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBucket {
    pub le: f64,
    /// Cumulative count of observations `<= le`.
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SeriesValue {
    Counter { value: u64 },
    Gauge { value: i64 },
    Histogram { count: u64, sum: f64, buckets: Vec<HistogramBucket> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: SeriesValue,
}

impl SeriesSnapshot {
    fn matches(&self, name: &str, labels: &[(&str, &str)]) -> bool {
        self.name == name
            && labels
                .iter()
                .all(|(k, v)| self.labels.get(*k).map(String::as_str) == Some(*v))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub series: Vec<SeriesSnapshot>,
}

impl MetricsSnapshot {
    /// Sum of every counter series of `name` whose labels include `labels`.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.series
            .iter()
            .filter(|s| s.matches(name, labels))
            .map(|s| match s.value {
                SeriesValue::Counter { value } => value,
                _ => 0,
            })
            .sum()
    }

    /// Total observations across matching histogram series.
    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.series
            .iter()
            .filter(|s| s.matches(name, labels))
            .map(|s| match s.value {
                SeriesValue::Histogram { count, .. } => count,
                _ => 0,
            })
            .sum()
    }

    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<i64> {
        self.series.iter().find(|s| s.matches(name, labels)).and_then(|s| match s.value {
            SeriesValue::Gauge { value } => Some(value),
            _ => None,
        })
    }

    pub fn series_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a SeriesSnapshot> + 'a {
        self.series.iter().filter(move |s| s.name == name)
    }
}

/// Metric sink: maps outcomes onto the per-kind families.
#[derive(Debug, Clone)]
pub struct MetricRecorder {
    registry: Arc<MetricRegistry>,
    business: bool,
    database: bool,
}

impl MetricRecorder {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self {
            registry,
            business: true,
            database: true,
        }
    }

    /// Switch business or database families on or off.
    pub fn with_families(mut self, business: bool, database: bool) -> Self {
        self.business = business;
        self.database = database;
        self
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn record_outcome(
        &self,
        descriptor: &OperationDescriptor,
        outcome: &OperationOutcome,
    ) -> Result<(), MetricsError> {
        let kind = descriptor.kind();
        if (kind.is_business() && !self.business) || (!kind.is_business() && !self.database) {
            return Ok(());
        }

        let reg = &self.registry;
        let subtype = descriptor.subtype();
        let status = outcome.status.as_str();
        let duration = outcome.duration_seconds;

        match kind {
            OperationKind::Authentication => {
                let labels = [("auth_type", subtype), ("status", status)];
                reg.increment_counter(AUTHENTICATION_ATTEMPTS_TOTAL, &labels)?;
                reg.observe_histogram(AUTHENTICATION_DURATION_SECONDS, &labels, duration)?;
                if outcome.status == OutcomeStatus::Failure {
                    let reason = outcome.failure_reason.as_deref().unwrap_or("unknown");
                    let reason = bounded_or_other(reason);
                    reg.increment_counter(FAILED_LOGIN_ATTEMPTS_TOTAL, &[("reason", reason)])?;
                }
            }
            OperationKind::UserOperation => {
                let labels = [("operation_type", subtype), ("status", status)];
                reg.increment_counter(USER_OPERATIONS_TOTAL, &labels)?;
                if subtype == "create" {
                    reg.observe_histogram(
                        USER_REGISTRATION_DURATION_SECONDS,
                        &[("status", status)],
                        duration,
                    )?;
                }
            }
            OperationKind::PasswordOperation => {
                let labels = [("operation_type", subtype), ("status", status)];
                reg.increment_counter(PASSWORD_OPERATIONS_TOTAL, &labels)?;
                if descriptor.flag("record_security") && outcome.is_success() {
                    reg.increment_counter(
                        SECURITY_EVENTS_TOTAL,
                        &[("event_type", "password_changed"), ("severity", "low")],
                    )?;
                }
            }
            OperationKind::TokenOperation => {
                let token_type = descriptor.label("token_type").unwrap_or("unknown");
                reg.increment_counter(
                    TOKEN_OPERATIONS_TOTAL,
                    &[("operation_type", subtype), ("token_type", token_type), ("status", status)],
                )?;
                if subtype == "generate" {
                    let labels = [("token_type", token_type)];
                    reg.observe_histogram(TOKEN_GENERATION_DURATION_SECONDS, &labels, duration)?;
                    let ttl = outcome.attribute("expires_in_seconds").and_then(|v| v.as_f64());
                    if let Some(ttl) = ttl {
                        reg.observe_histogram(TOKEN_EXPIRATION_SECONDS, &labels, ttl)?;
                    }
                }
            }
            OperationKind::DatabaseOperation => {
                let table = descriptor.label("table").unwrap_or("unknown");
                reg.increment_counter(
                    DATABASE_OPERATIONS_TOTAL,
                    &[("operation_type", subtype), ("table", table), ("status", status)],
                )?;
                reg.observe_histogram(
                    DATABASE_OPERATION_DURATION_SECONDS,
                    &[("operation_type", subtype), ("table", table)],
                    duration,
                )?;
            }
            OperationKind::Authorization => {
                let resource = descriptor.label("resource").unwrap_or("unknown");
                let action = descriptor.label("action").unwrap_or("unknown");
                let result = match outcome.status {
                    OutcomeStatus::Success => "allowed",
                    OutcomeStatus::Failure => "denied",
                    OutcomeStatus::Error => "error",
                };
                reg.increment_counter(
                    PERMISSION_CHECKS_TOTAL,
                    &[("resource", resource), ("action", action), ("result", result)],
                )?;
                reg.observe_histogram(
                    PERMISSION_CHECK_DURATION_SECONDS,
                    &[("resource", resource)],
                    duration,
                )?;
            }
            OperationKind::SecurityEvent => {
                if outcome.is_success() {
                    let severity = descriptor.label("severity").unwrap_or("medium");
                    let labels = [("event_type", subtype), ("severity", severity)];
                    reg.increment_counter(SECURITY_EVENTS_TOTAL, &labels)?;
                }
            }
        }
        Ok(())
    }
}

impl OutcomeSink for MetricRecorder {
    fn record(&self, recording: &Recording<'_>) -> Result<(), SinkError> {
        self.record_outcome(recording.descriptor, recording.outcome)
            .map_err(SinkError::from)
    }
}

/// Register all metric descriptions with the installed recorder.
pub fn register_metrics() {
    describe_counter!(AUTHENTICATION_ATTEMPTS_TOTAL, "Authentication attempts by type and status");
    describe_histogram!(AUTHENTICATION_DURATION_SECONDS, "Duration of authentication in seconds");
    describe_counter!(FAILED_LOGIN_ATTEMPTS_TOTAL, "Failed login attempts by reason");
    describe_counter!(USER_OPERATIONS_TOTAL, "User management operations by type and status");
    describe_histogram!(
        USER_REGISTRATION_DURATION_SECONDS,
        "Duration of user registration in seconds"
    );
    describe_counter!(PASSWORD_OPERATIONS_TOTAL, "Password operations by type and status");
    describe_counter!(TOKEN_OPERATIONS_TOTAL, "Token operations by type and status");
    describe_histogram!(
        TOKEN_GENERATION_DURATION_SECONDS,
        "Duration of token generation in seconds"
    );
    describe_histogram!(TOKEN_EXPIRATION_SECONDS, "Lifetime of issued tokens in seconds");
    describe_counter!(PERMISSION_CHECKS_TOTAL, "Permission checks by resource, action and result");
    describe_histogram!(
        PERMISSION_CHECK_DURATION_SECONDS,
        "Duration of permission checks in seconds"
    );
    describe_counter!(SECURITY_EVENTS_TOTAL, "Security events by type and severity");
    describe_counter!(DATABASE_OPERATIONS_TOTAL, "Database operations by type, table and status");
    describe_histogram!(
        DATABASE_OPERATION_DURATION_SECONDS,
        "Duration of database operations in seconds"
    );
    describe_gauge!(DATABASE_CONNECTIONS_ACTIVE, "Database connections currently checked out");
    describe_gauge!(ACTIVE_SESSIONS, "Monitored database sessions currently open");
    describe_counter!(SINK_FAILURES_TOTAL, "Telemetry sink recordings that failed");
    describe_counter!(LOG_EXPORT_FAILURES_TOTAL, "Log batches dropped after exhausting retries");
    describe_counter!(LOG_RECORDS_DROPPED_TOTAL, "Log records dropped because the buffer was full");
    describe_counter!(
        UNINSTRUMENTED_CANCELLATIONS_TOTAL,
        "Cancellations that could not be recorded"
    );
    describe_counter!(DATABASE_SESSIONS_LEAKED_TOTAL, "Sessions dropped without being released");
}

/// Install the Prometheus exporter and serve `/metrics` on `addr`.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut builder = PrometheusBuilder::new().with_http_listener(addr);
    for name in HISTOGRAMS {
        builder = builder
            .set_buckets_for_metric(Matcher::Full(name.to_string()), buckets_for(name))
            .map_err(|e| MetricsError::Exporter(e.to_string()))?;
    }
    builder.install().map_err(|e| MetricsError::Exporter(e.to_string()))?;
    register_metrics();
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}
