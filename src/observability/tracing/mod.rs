//! Trace recorder.
//!
//! # Responsibilities
//! - Start one span per envelope invocation, parented on the active correlation context
//! - Decide sampling once per trace and let children inherit the decision
//! - Continue remote traces from W3C `traceparent`/`tracestate` headers
//! - Hand finished, sampled spans to a [`SpanExporter`]
//!
//! # Design Decisions
//! - A disabled recorder hands out no-op spans, so call sites never branch
//! - Unsampled spans still carry ids for correlation but are never exported
//! - Every span opens a paired `tracing` span so process diagnostics emitted
//!   inside the operation carry the same `trace_id`/`span_id`

pub mod attributes;
pub mod context;
pub mod exporter;
pub mod sampler;
pub mod span;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

pub use context::{SpanId, TraceContext, TraceContextError, TraceId};
pub use exporter::{
    BufferedSpanExporter, ExportError, FanoutExporter, LoggingSpanExporter, SpanExporter,
};
pub use sampler::Sampler;
pub use span::{FinishedSpan, ScopedSpan, SpanEvent, SpanStatus};

use crate::observability::correlation;
use crate::observability::descriptor::{Attributes, OperationDescriptor};
use crate::observability::resource::Resource;
use span::ActiveSpan;

struct RecorderInner {
    sampler: Sampler,
    exporter: Arc<dyn SpanExporter>,
    resource: Arc<Resource>,
}

/// Creates spans. Cheap to clone.
#[derive(Clone, Default)]
pub struct TraceRecorder {
    inner: Option<Arc<RecorderInner>>,
}

impl TraceRecorder {
    pub fn new(sampler: Sampler, exporter: Arc<dyn SpanExporter>, resource: Resource) -> Self {
        Self {
            inner: Some(Arc::new(RecorderInner {
                sampler,
                exporter,
                resource: Arc::new(resource),
            })),
        }
    }

    /// A recorder whose spans are all no-ops.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Start the span for one instrumented operation under the current correlation context.
    pub fn start_span(&self, descriptor: &OperationDescriptor, inputs: &Attributes) -> ScopedSpan {
        let parent = correlation::current().trace_context();
        let name = attributes::span_name(descriptor);
        let mut span = self.start_span_with_parent(name, parent.as_ref());
        span.set_attributes(attributes::start_attributes(descriptor, inputs));
        if let Some(inner) = &self.inner {
            span.set_attribute("service.name", inner.resource.service_name.clone());
        }
        span
    }

    /// Start a span with an explicit parent; `None` starts a new trace.
    pub fn start_span_with_parent(
        &self,
        name: impl Into<String>,
        parent: Option<&TraceContext>,
    ) -> ScopedSpan {
        let Some(inner) = &self.inner else {
            return ScopedSpan::noop();
        };
        let name = name.into();

        let trace_id = parent.map(|p| p.trace_id).unwrap_or_else(TraceId::random);
        let span_id = SpanId::random();
        let sampled = inner.sampler.should_sample(&trace_id, parent.map(|p| p.sampled));
        let mut context = TraceContext::new(trace_id, span_id, sampled);
        context.trace_state = parent.and_then(|p| p.trace_state.clone());

        let diagnostics = tracing::info_span!(
            "operation",
            operation = %name,
            trace_id = %trace_id,
            span_id = %span_id,
            sampled = sampled,
        );

        ScopedSpan::active(ActiveSpan {
            name,
            context,
            parent_span_id: parent.map(|p| p.span_id),
            started_at: Utc::now(),
            start: Instant::now(),
            attributes: Attributes::new(),
            events: Vec::new(),
            exporter: inner.exporter.clone(),
            resource: inner.resource.clone(),
            diagnostics,
        })
    }

    /// Continue a trace propagated through `traceparent`/`tracestate` headers.
    ///
    /// A malformed header starts a fresh trace.
    pub fn start_span_with_remote_parent(
        &self,
        name: impl Into<String>,
        headers: &HashMap<String, String>,
    ) -> ScopedSpan {
        let parent = match TraceContext::extract(headers) {
            Ok(parent) => parent,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid trace context header");
                None
            }
        };
        self.start_span_with_parent(name, parent.as_ref())
    }
}

impl std::fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("TraceRecorder")
                .field("sample_rate", &inner.sampler.rate())
                .field("service", &inner.resource.service_name)
                .finish(),
            None => f.write_str("TraceRecorder(disabled)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(sampler: Sampler) -> (TraceRecorder, Arc<BufferedSpanExporter>) {
        let exporter = Arc::new(BufferedSpanExporter::default());
        let resource = Resource::new("test", "0.1.0", "test");
        let recorder = TraceRecorder::new(sampler, exporter.clone(), resource);
        (recorder, exporter)
    }

    #[test]
    fn test_disabled_recorder_hands_out_noops() {
        let span = TraceRecorder::disabled()
            .start_span(&OperationDescriptor::authentication("login"), &Attributes::new());
        assert!(span.context().is_none());
    }

    #[test]
    fn test_child_inherits_trace_and_sampling() {
        let (recorder, exporter) = recorder(Sampler::always_off());
        let parent = TraceContext::new(TraceId::random(), SpanId::random(), true);
        let child = recorder.start_span_with_parent("db.select", Some(&parent));
        assert_eq!(child.trace_id(), Some(parent.trace_id));
        assert!(child.is_recording());
        child.end(SpanStatus::Ok).unwrap();

        let spans = exporter.drain();
        assert_eq!(spans[0].parent_span_id, Some(parent.span_id.to_string()));
    }

    #[test]
    fn test_remote_parent() {
        let (recorder, _) = recorder(Sampler::always_on());
        let mut headers = HashMap::new();
        headers.insert(
            "traceparent".to_string(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00".to_string(),
        );
        headers.insert("tracestate".to_string(), "congo=t61rcWkgMzE".to_string());
        let span = recorder.start_span_with_remote_parent("auth.login", &headers);
        let ctx = span.context().unwrap();
        assert_eq!(ctx.trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(!ctx.sampled);
        assert_eq!(ctx.trace_state.as_deref(), Some("congo=t61rcWkgMzE"));

        headers.insert("traceparent".to_string(), "nonsense".to_string());
        let fresh = recorder.start_span_with_remote_parent("auth.login", &headers);
        assert_ne!(fresh.trace_id().unwrap().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
    }

    #[test]
    fn test_start_span_sets_vocabulary() {
        let (recorder, exporter) = recorder(Sampler::always_on());
        let descriptor = OperationDescriptor::token_operation("generate", "access");
        let span = recorder.start_span(&descriptor, &Attributes::new());
        assert_eq!(span.name(), Some("token.generate"));
        span.end(SpanStatus::Ok).unwrap();
        let spans = exporter.drain();
        assert_eq!(spans[0].attribute_str("token.type"), Some("access"));
        assert_eq!(spans[0].attribute_str("service.name"), Some("test"));
    }
}
