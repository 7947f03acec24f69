//! Scoped spans.
//!
//! A [`ScopedSpan`] is ended exactly once: explicitly through [`ScopedSpan::end`]
//! or, on any other exit path, by its `Drop` impl with status `Unset`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::observability::descriptor::{AttrValue, Attributes};
use crate::observability::privacy::{scrub_text, scrub_value};
use crate::observability::resource::Resource;
use crate::observability::tracing::context::{SpanId, TraceContext, TraceId};
use crate::observability::tracing::exporter::{ExportError, SpanExporter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error { description: String },
}

impl SpanStatus {
    pub fn error(description: impl Into<String>) -> Self {
        SpanStatus::Error {
            description: description.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: Attributes,
}

/// A span handed to the exporter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishedSpan {
    pub name: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub status: SpanStatus,
    pub resource: Resource,
}

impl FinishedSpan {
    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attribute(key).and_then(AttrValue::as_str)
    }
}

pub(crate) struct ActiveSpan {
    pub(crate) name: String,
    pub(crate) context: TraceContext,
    pub(crate) parent_span_id: Option<SpanId>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) start: Instant,
    pub(crate) attributes: Attributes,
    pub(crate) events: Vec<SpanEvent>,
    pub(crate) exporter: Arc<dyn SpanExporter>,
    pub(crate) resource: Arc<Resource>,
    pub(crate) diagnostics: tracing::Span,
}

impl ActiveSpan {
    fn finish(self, status: SpanStatus) -> Result<(), ExportError> {
        if !self.context.sampled {
            return Ok(());
        }
        let span = FinishedSpan {
            name: self.name,
            trace_id: self.context.trace_id.to_string(),
            span_id: self.context.span_id.to_string(),
            parent_span_id: self.parent_span_id.map(|id| id.to_string()),
            start_time: self.started_at,
            end_time: Utc::now(),
            duration_seconds: self.start.elapsed().as_secs_f64(),
            attributes: self.attributes,
            events: self.events,
            status,
            resource: Resource::clone(&self.resource),
        };
        self.exporter.export(span)
    }
}

/// One traced unit of work. Inert when tracing is disabled.
pub struct ScopedSpan {
    inner: Option<ActiveSpan>,
    disabled_diagnostics: tracing::Span,
}

impl ScopedSpan {
    pub(crate) fn active(span: ActiveSpan) -> Self {
        Self {
            inner: Some(span),
            disabled_diagnostics: tracing::Span::none(),
        }
    }

    /// A span whose methods do nothing.
    pub fn noop() -> Self {
        Self {
            inner: None,
            disabled_diagnostics: tracing::Span::none(),
        }
    }

    /// Whether this span will be exported.
    pub fn is_recording(&self) -> bool {
        self.inner.as_ref().is_some_and(|s| s.context.sampled)
    }

    /// Propagation context; `None` for no-op spans.
    pub fn context(&self) -> Option<&TraceContext> {
        self.inner.as_ref().map(|s| &s.context)
    }

    pub fn trace_id(&self) -> Option<TraceId> {
        self.context().map(|c| c.trace_id)
    }

    pub fn span_id(&self) -> Option<SpanId> {
        self.context().map(|c| c.span_id)
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.as_ref().map(|s| s.name.as_str())
    }

    /// The diagnostic `tracing` span paired with this span.
    pub fn diagnostics(&self) -> &tracing::Span {
        match &self.inner {
            Some(s) => &s.diagnostics,
            None => &self.disabled_diagnostics,
        }
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        if let Some(span) = self.inner.as_mut().filter(|s| s.context.sampled) {
            let key = key.into();
            let value = scrub_value(&key, value.into());
            span.attributes.insert(key, value);
        }
    }

    pub fn set_attributes(&mut self, attributes: Attributes) {
        for (key, value) in attributes {
            self.set_attribute(key, value);
        }
    }

    /// Attach an `exception` event.
    pub fn record_exception(&mut self, description: &str) {
        if let Some(span) = self.inner.as_mut().filter(|s| s.context.sampled) {
            let mut attributes = Attributes::new();
            attributes.insert("exception.message".into(), AttrValue::Str(scrub_text(description)));
            span.events.push(SpanEvent {
                name: "exception".into(),
                timestamp: Utc::now(),
                attributes,
            });
        }
    }

    /// End the span with `status` and hand it to the exporter.
    pub fn end(mut self, status: SpanStatus) -> Result<(), ExportError> {
        match self.inner.take() {
            Some(span) => span.finish(status),
            None => Ok(()),
        }
    }
}

impl Drop for ScopedSpan {
    fn drop(&mut self) {
        if let Some(span) = self.inner.take() {
            let name = span.name.clone();
            match panic::catch_unwind(AssertUnwindSafe(move || span.finish(SpanStatus::Unset))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(span = %name, error = %e, "Failed to export dropped span")
                }
                Err(_) => {
                    tracing::warn!(span = %name, "Span exporter panicked while ending dropped span")
                }
            }
        }
    }
}

impl std::fmt::Debug for ScopedSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(s) => f
                .debug_struct("ScopedSpan")
                .field("name", &s.name)
                .field("trace_id", &s.context.trace_id.to_string())
                .field("span_id", &s.context.span_id.to_string())
                .field("sampled", &s.context.sampled)
                .finish(),
            None => f.write_str("ScopedSpan(noop)"),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_span(name: &str) -> FinishedSpan {
    let now = Utc::now();
    FinishedSpan {
        name: name.to_string(),
        trace_id: TraceId::random().to_string(),
        span_id: SpanId::random().to_string(),
        parent_span_id: None,
        start_time: now,
        end_time: now,
        duration_seconds: 0.0,
        attributes: Attributes::new(),
        events: Vec::new(),
        status: SpanStatus::Unset,
        resource: Resource::new("test", "0.0.0", "test"),
    }
}
