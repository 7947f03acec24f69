//! Span exporters.
//!
//! Export is synchronous and non-blocking: finished spans are either written
//! to the diagnostic log or parked in a bounded buffer that the external
//! trace transport drains.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::observability::tracing::span::FinishedSpan;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("span exporter unavailable: {0}")]
    Unavailable(String),

    #[error("span rejected: {0}")]
    Rejected(String),
}

pub trait SpanExporter: Send + Sync {
    fn export(&self, span: FinishedSpan) -> Result<(), ExportError>;
}

/// Writes finished spans as JSON to the `tracing` channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSpanExporter;

impl SpanExporter for LoggingSpanExporter {
    fn export(&self, span: FinishedSpan) -> Result<(), ExportError> {
        let json = serde_json::to_string(&span).map_err(|e| ExportError::Rejected(e.to_string()))?;
        tracing::info!(target: "identity_telemetry::spans", span = %json, "Span finished");
        Ok(())
    }
}

/// Bounded in-memory span queue; the oldest span is dropped on overflow.
#[derive(Debug)]
pub struct BufferedSpanExporter {
    spans: Mutex<VecDeque<FinishedSpan>>,
    capacity: usize,
}

impl BufferedSpanExporter {
    pub fn new(capacity: usize) -> Self {
        Self {
            spans: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Take every buffered span.
    pub fn drain(&self) -> Vec<FinishedSpan> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferedSpanExporter {
    fn default() -> Self {
        Self::new(2048)
    }
}

impl SpanExporter for BufferedSpanExporter {
    fn export(&self, span: FinishedSpan) -> Result<(), ExportError> {
        let mut spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);
        if spans.len() >= self.capacity {
            spans.pop_front();
            tracing::debug!(capacity = self.capacity, "Span buffer full, dropping oldest span");
        }
        spans.push_back(span);
        Ok(())
    }
}

/// Sends each span to every inner exporter; the first error is returned after all have run.
pub struct FanoutExporter {
    exporters: Vec<std::sync::Arc<dyn SpanExporter>>,
}

impl FanoutExporter {
    pub fn new(exporters: Vec<std::sync::Arc<dyn SpanExporter>>) -> Self {
        Self { exporters }
    }
}

impl SpanExporter for FanoutExporter {
    fn export(&self, span: FinishedSpan) -> Result<(), ExportError> {
        let mut first_error = None;
        for exporter in &self.exporters {
            if let Err(e) = exporter.export(span.clone()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::tracing::span::test_span;

    #[test]
    fn test_buffer_drops_oldest() {
        let exporter = BufferedSpanExporter::new(2);
        for name in ["a", "b", "c"] {
            exporter.export(test_span(name)).unwrap();
        }
        let names: Vec<_> = exporter.drain().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(exporter.is_empty());
    }

    #[test]
    fn test_fanout_reaches_every_exporter() {
        struct Broken;
        impl SpanExporter for Broken {
            fn export(&self, _span: FinishedSpan) -> Result<(), ExportError> {
                Err(ExportError::Unavailable("collector down".into()))
            }
        }
        let buffer = std::sync::Arc::new(BufferedSpanExporter::default());
        let broken: std::sync::Arc<dyn SpanExporter> = std::sync::Arc::new(Broken);
        let buffered: std::sync::Arc<dyn SpanExporter> = buffer.clone();
        let fanout = FanoutExporter::new(vec![broken, buffered]);
        assert!(fanout.export(test_span("x")).is_err());
        assert_eq!(buffer.len(), 1);
    }
}
