//! Sink contract and fail-open isolation.
//!
//! Every telemetry side effect runs through [`isolate`]. A sink that returns
//! an error or panics is counted and logged at WARN; the wrapped operation
//! never sees it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::observability::correlation::CorrelationContext;
use crate::observability::descriptor::{OperationDescriptor, OperationOutcome};
use crate::observability::metrics::MetricsError;
use crate::observability::tracing::ExportError;

/// Telemetry sinks, as reported in `observability_sink_failures_total{sink}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Metrics,
    Logs,
    Traces,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Metrics => "metrics",
            SinkKind::Logs => "logs",
            SinkKind::Traces => "traces",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("metric rejected: {0}")]
    Metrics(#[from] MetricsError),

    #[error("span export failed: {0}")]
    Export(#[from] ExportError),

    #[error("record rejected: {0}")]
    Rejected(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Everything a sink needs to record one settled invocation.
#[derive(Debug, Clone, Copy)]
pub struct Recording<'a> {
    pub descriptor: &'a OperationDescriptor,
    pub outcome: &'a OperationOutcome,
    pub correlation: &'a CorrelationContext,
}

/// A destination for settled outcomes.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, recording: &Recording<'_>) -> Result<(), SinkError>;
}

/// Counts telemetry that was lost.
///
/// Counters are kept locally so they can be inspected without a recorder,
/// and mirrored to the `metrics` facade for export.
#[derive(Debug, Default)]
pub struct FailureLedger {
    metrics: AtomicU64,
    logs: AtomicU64,
    traces: AtomicU64,
    uninstrumented_cancellations: AtomicU64,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, sink: SinkKind) {
        let counter = match sink {
            SinkKind::Metrics => &self.metrics,
            SinkKind::Logs => &self.logs,
            SinkKind::Traces => &self.traces,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            crate::observability::metrics::SINK_FAILURES_TOTAL,
            "sink" => sink.as_str()
        )
        .increment(1);
    }

    pub fn failures(&self, sink: SinkKind) -> u64 {
        match sink {
            SinkKind::Metrics => self.metrics.load(Ordering::Relaxed),
            SinkKind::Logs => self.logs.load(Ordering::Relaxed),
            SinkKind::Traces => self.traces.load(Ordering::Relaxed),
        }
    }

    /// A cancellation happened while the thread was unwinding, so nothing was recorded.
    pub fn record_uninstrumented_cancellation(&self) {
        self.uninstrumented_cancellations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(crate::observability::metrics::UNINSTRUMENTED_CANCELLATIONS_TOTAL)
            .increment(1);
    }

    pub fn uninstrumented_cancellations(&self) -> u64 {
        self.uninstrumented_cancellations.load(Ordering::Relaxed)
    }
}

/// Run a sink side effect, absorbing errors and panics.
///
/// Returns `true` if the side effect completed.
pub fn isolate<F>(sink: SinkKind, ledger: &FailureLedger, f: F) -> bool
where
    F: FnOnce() -> Result<(), SinkError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            ledger.record_failure(sink);
            tracing::warn!(sink = %sink, error = %e, "Telemetry sink failed");
            false
        }
        Err(payload) => {
            ledger.record_failure(sink);
            let message = panic_message(payload.as_ref());
            tracing::warn!(sink = %sink, panic = %message, "Telemetry sink panicked");
            false
        }
    }
}

/// Best-effort text for a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolate_absorbs_errors() {
        let ledger = FailureLedger::new();
        let ok = isolate(SinkKind::Logs, &ledger, || Err(SinkError::Unavailable("down".into())));
        assert!(!ok);
        assert_eq!(ledger.failures(SinkKind::Logs), 1);
        assert_eq!(ledger.failures(SinkKind::Metrics), 0);
    }

    #[test]
    fn test_isolate_absorbs_panics() {
        let ledger = FailureLedger::new();
        let ok = isolate(SinkKind::Traces, &ledger, || panic!("exporter exploded"));
        assert!(!ok);
        assert_eq!(ledger.failures(SinkKind::Traces), 1);
    }

    #[test]
    fn test_isolate_passes_success() {
        let ledger = FailureLedger::new();
        assert!(isolate(SinkKind::Metrics, &ledger, || Ok(())));
        assert_eq!(ledger.failures(SinkKind::Metrics), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
