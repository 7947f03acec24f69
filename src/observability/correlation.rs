//! Correlation context.
//!
//! The active trace/span ids and the masked caller identity travel with the
//! future that owns them (a `tokio` task-local), not with the OS thread, so
//! operations interleaved on the same worker never see each other's ids.

use std::future::Future;

use tokio::task::futures::TaskLocalFuture;

use crate::observability::privacy::mask_email;
use crate::observability::tracing::{ScopedSpan, SpanId, TraceContext, TraceId};

tokio::task_local! {
    static CURRENT: CorrelationContext;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationContext {
    pub trace_id: Option<TraceId>,
    pub span_id: Option<SpanId>,
    pub sampled: bool,
    pub trace_state: Option<String>,
    /// Already masked; raw identities are never stored here.
    pub masked_identity: Option<String>,
}

impl CorrelationContext {
    /// Context continuing a propagated trace.
    pub fn from_trace_context(ctx: &TraceContext) -> Self {
        Self {
            trace_id: Some(ctx.trace_id),
            span_id: Some(ctx.span_id),
            sampled: ctx.sampled,
            trace_state: ctx.trace_state.clone(),
            masked_identity: None,
        }
    }

    /// Parent for new spans, if a trace is active.
    pub fn trace_context(&self) -> Option<TraceContext> {
        match (self.trace_id, self.span_id) {
            (Some(trace_id), Some(span_id)) => {
                let mut ctx = TraceContext::new(trace_id, span_id, self.sampled);
                ctx.trace_state = self.trace_state.clone();
                Some(ctx)
            }
            _ => None,
        }
    }

    /// Child context for the duration of `span`. No-op spans keep the parent's ids.
    pub fn child_of(&self, span: &ScopedSpan) -> Self {
        match span.context() {
            Some(ctx) => Self {
                trace_id: Some(ctx.trace_id),
                span_id: Some(ctx.span_id),
                sampled: ctx.sampled,
                trace_state: ctx.trace_state.clone(),
                masked_identity: self.masked_identity.clone(),
            },
            None => self.clone(),
        }
    }

    /// Attach an identity; it is masked before being stored.
    pub fn with_identity(mut self, raw: &str) -> Self {
        self.masked_identity = Some(mask_email(raw));
        self
    }

    pub fn trace_id_hex(&self) -> Option<String> {
        self.trace_id.map(|id| id.to_string())
    }

    pub fn span_id_hex(&self) -> Option<String> {
        self.span_id.map(|id| id.to_string())
    }
}

/// The active context, or an empty one outside any scope.
pub fn current() -> CorrelationContext {
    CURRENT.try_with(|ctx| ctx.clone()).unwrap_or_default()
}

/// Run `fut` with `ctx` as the active context; the previous one is restored afterwards.
pub fn scope<F: Future>(ctx: CorrelationContext, fut: F) -> TaskLocalFuture<CorrelationContext, F> {
    CURRENT.scope(ctx, fut)
}

/// Run `fut` inside a child context of `span`.
pub fn with_span<F: Future>(span: &ScopedSpan, fut: F) -> TaskLocalFuture<CorrelationContext, F> {
    scope(current().child_of(span), fut)
}

/// Synchronous variant of [`scope`].
pub fn sync_scope<R>(ctx: CorrelationContext, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(ctx, f)
}
