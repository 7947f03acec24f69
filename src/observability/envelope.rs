//! Instrumentation envelope.
//!
//! An [`Envelope`] wraps one asynchronous call, times it, classifies the
//! result through an [`AttributeExtractor`] and records the outcome to its
//! sinks in a fixed order: metrics, then logs, then the trace span. Every
//! sink call goes through [`isolate`], so the caller always gets exactly what
//! the inner call produced.
//!
//! Envelopes nest. An [`EnvelopeChain`] composes several of them explicitly;
//! the first layer is the outermost.

use std::convert::Infallible;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::Instrument;

use crate::observability::classify::{AttributeExtractor, Settled};
use crate::observability::correlation::{self, CorrelationContext};
use crate::observability::descriptor::{Attributes, OperationDescriptor, OperationOutcome};
use crate::observability::sink::{
    isolate, panic_message, FailureLedger, OutcomeSink, Recording, SinkKind,
};
use crate::observability::tracing::attributes::finish_attributes;
use crate::observability::tracing::{ScopedSpan, TraceRecorder};

/// Wraps calls for one operation.
#[derive(Clone)]
pub struct Envelope {
    descriptor: Arc<OperationDescriptor>,
    metrics: Option<Arc<dyn OutcomeSink>>,
    logs: Option<Arc<dyn OutcomeSink>>,
    tracer: TraceRecorder,
    ledger: Arc<FailureLedger>,
}

impl Envelope {
    /// An envelope with no sinks attached.
    pub fn new(descriptor: OperationDescriptor, ledger: Arc<FailureLedger>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            metrics: None,
            logs: None,
            tracer: TraceRecorder::disabled(),
            ledger,
        }
    }

    pub fn with_metrics(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn with_logs(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.logs = Some(sink);
        self
    }

    pub fn with_tracer(mut self, tracer: TraceRecorder) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    pub fn ledger(&self) -> &Arc<FailureLedger> {
        &self.ledger
    }

    /// Run `call` and record its outcome.
    ///
    /// Returns the call's result unchanged. A panic inside `call` is recorded
    /// as an error and then resumed. If the returned future is dropped before
    /// `call` settles, the outcome is recorded as cancelled.
    pub async fn run<T, E, X, F>(&self, extractor: &X, call: F) -> Result<T, E>
    where
        X: AttributeExtractor<T, E> + ?Sized,
        F: Future<Output = Result<T, E>>,
    {
        let before = extractor.before();
        let span = self.tracer.start_span(&self.descriptor, &before);

        let mut context = correlation::current().child_of(&span);
        if let Some(identity) = extractor.identity() {
            context = context.with_identity(identity);
        }
        let diagnostics = span.diagnostics().clone();

        let mut in_flight = InFlight {
            envelope: self,
            span: Some(span),
            context,
            before,
            start: Instant::now(),
            settled: false,
        };

        let guarded = AssertUnwindSafe(call).catch_unwind();
        let result = correlation::scope(in_flight.context.clone(), guarded)
            .instrument(diagnostics)
            .await;
        let elapsed = in_flight.start.elapsed();

        match result {
            Ok(Ok(value)) => {
                let settled = classify(|| extractor.on_ok(&value), Settled::success);
                in_flight.settle(settled, elapsed);
                Ok(value)
            }
            Ok(Err(error)) => {
                let settled = classify(
                    || extractor.on_err(&error),
                    || Settled::error("unclassified error"),
                );
                in_flight.settle(settled, elapsed);
                Err(error)
            }
            Err(payload) => {
                let description = format!("panicked: {}", panic_message(payload.as_ref()));
                in_flight.settle(Settled::error(description), elapsed);
                panic::resume_unwind(payload)
            }
        }
    }

    /// [`run`](Self::run) for calls that cannot fail.
    pub async fn run_infallible<T, X, F>(&self, extractor: &X, call: F) -> T
    where
        X: AttributeExtractor<T, Infallible> + ?Sized,
        F: Future<Output = T>,
    {
        match self.run(extractor, call.map(Ok::<T, Infallible>)).await {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    fn record(
        &self,
        settled: Settled,
        elapsed: Duration,
        mut attributes: Attributes,
        context: &CorrelationContext,
        mut span: ScopedSpan,
    ) {
        attributes.extend(settled.attributes);
        let outcome = OperationOutcome {
            status: settled.status,
            duration_seconds: elapsed.as_secs_f64(),
            failure_reason: settled.failure_reason,
            error: settled.error,
            result_attributes: attributes,
        };
        let recording = Recording {
            descriptor: &self.descriptor,
            outcome: &outcome,
            correlation: context,
        };

        if let Some(metrics) = &self.metrics {
            isolate(SinkKind::Metrics, &self.ledger, || metrics.record(&recording));
        }
        if let Some(logs) = &self.logs {
            isolate(SinkKind::Logs, &self.ledger, || logs.record(&recording));
        }
        isolate(SinkKind::Traces, &self.ledger, move || {
            let (finish, status) = finish_attributes(&self.descriptor, &outcome);
            span.set_attributes(finish);
            if let Some(error) = &outcome.error {
                span.record_exception(error);
            }
            span.end(status)?;
            Ok(())
        });
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("descriptor", &self.descriptor)
            .field("metrics", &self.metrics.is_some())
            .field("logs", &self.logs.is_some())
            .field("tracer", &self.tracer)
            .finish()
    }
}

/// Extractors are caller code; a panicking one must not take the call down with it.
fn classify(f: impl FnOnce() -> Settled, fallback: impl FnOnce() -> Settled) -> Settled {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(settled) => settled,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(panic = %message, "Attribute extractor panicked");
            fallback()
        }
    }
}

/// Records the outcome exactly once, including when the call is dropped mid-flight.
struct InFlight<'a> {
    envelope: &'a Envelope,
    span: Option<ScopedSpan>,
    context: CorrelationContext,
    before: Attributes,
    start: Instant,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(&mut self, settled: Settled, elapsed: Duration) {
        self.settled = true;
        let span = self.span.take().unwrap_or_else(ScopedSpan::noop);
        let before = std::mem::take(&mut self.before);
        self.envelope.record(settled, elapsed, before, &self.context, span);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if std::thread::panicking() {
            self.envelope.ledger.record_uninstrumented_cancellation();
            return;
        }
        let operation = self.envelope.descriptor.subtype();
        tracing::debug!(operation = %operation, "Instrumented call cancelled");
        let elapsed = self.start.elapsed();
        self.settle(Settled::cancelled(), elapsed);
    }
}

/// Explicitly ordered stack of envelopes around one call.
#[derive(Clone, Debug, Default)]
pub struct EnvelopeChain {
    layers: Vec<Envelope>,
}

impl EnvelopeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer inside the existing ones.
    pub fn layer(mut self, envelope: Envelope) -> Self {
        self.layers.push(envelope);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Descriptors from the outermost layer inwards.
    pub fn descriptors(&self) -> Vec<&OperationDescriptor> {
        self.layers.iter().map(Envelope::descriptor).collect()
    }

    /// Run `call` through every layer. Each layer records independently.
    pub fn run<'a, T, E, X>(
        &'a self,
        extractor: &'a X,
        call: BoxFuture<'a, Result<T, E>>,
    ) -> BoxFuture<'a, Result<T, E>>
    where
        T: Send + 'a,
        E: Send + 'a,
        X: AttributeExtractor<T, E> + ?Sized + 'a,
    {
        self.layers
            .iter()
            .rev()
            .fold(call, |inner, layer| Box::pin(layer.run(extractor, inner)))
    }
}
