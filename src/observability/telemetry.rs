//! Process-level wiring.
//!
//! [`Telemetry`] is built once from the validated configuration and owns the
//! metric registry, the log emitter, the trace recorder and the failure
//! ledger. Components receive it (or envelopes built from it) through their
//! constructors; nothing here is global.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::config::schema::{ObservabilityConfig, TelemetryConfig};
use crate::lifecycle::Shutdown;
use crate::observability::descriptor::OperationDescriptor;
use crate::observability::envelope::Envelope;
use crate::observability::logging::{
    EmitterSettings, FlushReport, LogEmitter, LogTransport, LokiTransport, StdoutTransport,
    TransportError,
};
use crate::observability::metrics::{MetricRecorder, MetricRegistry, MetricsSnapshot};
use crate::observability::resource::Resource;
use crate::observability::sink::{FailureLedger, OutcomeSink};
use crate::observability::tracing::{
    BufferedSpanExporter, FanoutExporter, LoggingSpanExporter, Sampler, SpanExporter,
    TraceRecorder,
};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("log transport: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to install subscriber: {0}")]
    Subscriber(String),
}

/// Handle to every telemetry sink of the process.
pub struct Telemetry {
    config: TelemetryConfig,
    resource: Resource,
    registry: Arc<MetricRegistry>,
    metric_sink: Option<Arc<MetricRecorder>>,
    emitter: LogEmitter,
    tracer: TraceRecorder,
    spans: Arc<BufferedSpanExporter>,
    ledger: Arc<FailureLedger>,
    shutdown: Shutdown,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl Telemetry {
    /// Build from config. Logs ship to Loki when log shipping is enabled and
    /// go to stdout otherwise.
    pub fn from_config(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let shipping = &config.log_shipping;
        let transport: Arc<dyn LogTransport> = if shipping.enabled {
            Arc::new(LokiTransport::new(
                &shipping.url,
                shipping.labels.clone(),
                Duration::from_secs(shipping.timeout_secs.max(1)),
            )?)
        } else {
            Arc::new(StdoutTransport)
        };
        Ok(Self::with_transport(config, transport))
    }

    /// Build with an explicit log transport.
    pub fn with_transport(config: &TelemetryConfig, transport: Arc<dyn LogTransport>) -> Self {
        let resource = Resource::from_config(&config.service);
        let registry = Arc::new(MetricRegistry::new());

        let metric_sink = config.metrics.enabled.then(|| {
            Arc::new(
                MetricRecorder::new(registry.clone())
                    .with_families(
                        config.metrics.business_metrics,
                        config.metrics.database_metrics,
                    ),
            )
        });

        let emitter = LogEmitter::new(
            transport,
            EmitterSettings::from_config(&config.log_shipping),
            resource.clone(),
            Some(registry.clone()),
        );

        let spans = Arc::new(BufferedSpanExporter::default());
        let tracer = if config.tracing.enabled {
            let exporter: Arc<dyn SpanExporter> = if config.tracing.console_export {
                let console: Arc<dyn SpanExporter> = Arc::new(LoggingSpanExporter);
                let buffered: Arc<dyn SpanExporter> = spans.clone();
                Arc::new(FanoutExporter::new(vec![buffered, console]))
            } else {
                spans.clone()
            };
            let sampler = Sampler::ratio(config.tracing.sample_rate);
            TraceRecorder::new(sampler, exporter, resource.clone())
        } else {
            TraceRecorder::disabled()
        };

        tracing::info!(
            service = %resource.service_name,
            environment = %resource.environment,
            metrics = config.metrics.enabled,
            log_shipping = config.log_shipping.enabled,
            tracing = config.tracing.enabled,
            sample_rate = config.tracing.sample_rate,
            "Telemetry initialized"
        );

        Self {
            config: config.clone(),
            resource,
            registry,
            metric_sink,
            emitter,
            tracer,
            spans,
            ledger: Arc::new(FailureLedger::new()),
            shutdown: Shutdown::new(),
            flusher: Mutex::new(None),
        }
    }

    /// Envelope recording to every enabled sink.
    pub fn envelope(&self, descriptor: OperationDescriptor) -> Envelope {
        let mut envelope = Envelope::new(descriptor, self.ledger.clone())
            .with_logs(self.log_sink())
            .with_tracer(self.tracer.clone());
        if let Some(metrics) = self.metric_sink() {
            envelope = envelope.with_metrics(metrics);
        }
        envelope
    }

    /// `None` when metrics are disabled.
    pub fn metric_sink(&self) -> Option<Arc<dyn OutcomeSink>> {
        self.metric_sink.clone().map(|sink| sink as Arc<dyn OutcomeSink>)
    }

    pub fn log_sink(&self) -> Arc<dyn OutcomeSink> {
        Arc::new(self.emitter.clone())
    }

    pub fn tracer(&self) -> &TraceRecorder {
        &self.tracer
    }

    pub fn emitter(&self) -> &LogEmitter {
        &self.emitter
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<FailureLedger> {
        &self.ledger
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Spans waiting for the trace transport.
    pub fn span_buffer(&self) -> &Arc<BufferedSpanExporter> {
        &self.spans
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }

    /// Spawn the background log flusher. Calling it again is a no-op.
    pub fn start(&self) {
        let mut flusher = self.flusher.lock().unwrap_or_else(PoisonError::into_inner);
        if flusher.is_none() && !self.shutdown.is_triggered() {
            *flusher = Some(self.emitter.spawn_flusher(self.shutdown.subscribe()));
        }
    }

    /// Signal shutdown and wait for the final log flush.
    pub async fn shutdown(&self) -> FlushReport {
        self.shutdown.trigger();
        let handle = self.flusher.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Log flusher task failed");
            }
        }
        // Anything emitted after the flusher's final pass.
        let report = self.emitter.flush().await;
        let stats = self.emitter.stats();
        tracing::info!(
            exported = stats.exported,
            dropped = stats.dropped,
            failed_batches = stats.failed_batches,
            "Telemetry shut down"
        );
        report
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("resource", &self.resource)
            .field("metrics", &self.metric_sink.is_some())
            .field("emitter", &self.emitter)
            .field("tracer", &self.tracer)
            .finish()
    }
}

/// Install the process-wide `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level.
pub fn init_subscriber(config: &ObservabilityConfig) -> Result<(), TelemetryError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    let fmt_layer = if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}
