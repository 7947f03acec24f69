//! Shared sinks, transports and fixtures for integration tests.
#![allow(dead_code)]

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use identity_telemetry::config::TelemetryConfig;
use identity_telemetry::observability::descriptor::{OperationDescriptor, OperationOutcome};
use identity_telemetry::observability::logging::{LogRecord, LogTransport, TransportError};
use identity_telemetry::observability::tracing::{ExportError, FinishedSpan, SpanExporter};
use identity_telemetry::observability::{
    CorrelationContext, FailureCategory, OutcomeSink, Recording, SinkError, Telemetry,
};

/// Captures every recording it is handed.
#[derive(Default)]
pub struct RecordingSink {
    recorded: Mutex<Vec<(OperationDescriptor, OperationOutcome, CorrelationContext)>>,
}

impl RecordingSink {
    pub fn outcomes(&self) -> Vec<OperationOutcome> {
        self.recorded.lock().unwrap().iter().map(|(_, o, _)| o.clone()).collect()
    }

    pub fn correlations(&self) -> Vec<CorrelationContext> {
        self.recorded.lock().unwrap().iter().map(|(_, _, c)| c.clone()).collect()
    }

    pub fn descriptors(&self) -> Vec<OperationDescriptor> {
        self.recorded.lock().unwrap().iter().map(|(d, _, _)| d.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }
}

impl OutcomeSink for RecordingSink {
    fn record(&self, recording: &Recording<'_>) -> Result<(), SinkError> {
        self.recorded.lock().unwrap().push((
            recording.descriptor.clone(),
            recording.outcome.clone(),
            recording.correlation.clone(),
        ));
        Ok(())
    }
}

/// Rejects everything.
pub struct FailingSink;

impl OutcomeSink for FailingSink {
    fn record(&self, _recording: &Recording<'_>) -> Result<(), SinkError> {
        Err(SinkError::Unavailable("backend down".into()))
    }
}

/// Panics on every recording.
pub struct PanickingSink;

impl OutcomeSink for PanickingSink {
    fn record(&self, _recording: &Recording<'_>) -> Result<(), SinkError> {
        panic!("sink blew up")
    }
}

/// Log transport keeping pushed batches in memory.
#[derive(Default)]
pub struct MemoryTransport {
    records: Mutex<Vec<LogRecord>>,
    pushes: AtomicUsize,
    failing: std::sync::atomic::AtomicBool,
}

impl MemoryTransport {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl LogTransport for MemoryTransport {
    fn push<'a>(&'a self, batch: &'a [LogRecord]) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::Unavailable("loki is down".into()));
            }
            self.records.lock().unwrap().extend_from_slice(batch);
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Span exporter that always fails.
pub struct FailingExporter;

impl SpanExporter for FailingExporter {
    fn export(&self, _span: FinishedSpan) -> Result<(), ExportError> {
        Err(ExportError::Unavailable("collector down".into()))
    }
}

/// Span exporter that panics.
pub struct PanickingExporter;

impl SpanExporter for PanickingExporter {
    fn export(&self, _span: FinishedSpan) -> Result<(), ExportError> {
        panic!("exporter blew up")
    }
}

/// Error type for calls under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    Denied,
    Crashed(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Denied => f.write_str("denied"),
            CallError::Crashed(msg) => write!(f, "crashed: {}", msg),
        }
    }
}

impl FailureCategory for CallError {
    fn failure_category(&self) -> Option<Cow<'static, str>> {
        match self {
            CallError::Denied => Some(Cow::Borrowed("denied")),
            CallError::Crashed(_) => None,
        }
    }
}

/// Config with every signal on, shipping disabled and full sampling.
pub fn test_config() -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.service.name = "identity-test".into();
    config.service.environment = "test".into();
    config.metrics.enabled = true;
    config.metrics.business_metrics = true;
    config.metrics.database_metrics = true;
    config.tracing.enabled = true;
    config.tracing.sample_rate = 1.0;
    config.tracing.console_export = false;
    config.log_shipping.retry_base_delay_ms = 1;
    config.log_shipping.retry_max_delay_ms = 2;
    config.log_shipping.max_retries = 1;
    config
}

/// Telemetry writing logs to a [`MemoryTransport`].
pub fn telemetry_with(config: &TelemetryConfig) -> (Arc<Telemetry>, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::default());
    let telemetry = Telemetry::with_transport(config, transport.clone());
    (Arc::new(telemetry), transport)
}

/// Flush buffered logs and return everything the transport received.
pub async fn flushed_logs(telemetry: &Telemetry, transport: &MemoryTransport) -> Vec<LogRecord> {
    telemetry.emitter().flush().await;
    transport.records()
}
