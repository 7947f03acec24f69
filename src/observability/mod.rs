//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! instrumented call
//!     → envelope.rs (time, classify through classify.rs, correlation.rs scope)
//!     → sink.rs isolate boundary, in order:
//!         → metrics.rs (per-kind counters/histograms, bounded labels)
//!         → logging/ (structured record, buffered, shipped by one flusher)
//!         → tracing/ (span attributes, status, export)
//!
//! Consumers:
//!     → Prometheus scrape (metrics facade exporter)
//!     → Loki push API or stdout JSON lines
//!     → span buffer drained by the trace transport
//! ```
//!
//! # Design Decisions
//! - One outcome per invocation, shared by all three sinks
//! - Sink failures are counted and logged, never propagated
//! - Correlation ids live in a task-local, not a thread-local
//! - Emails are masked and secrets redacted before anything leaves the process

pub mod classify;
pub mod correlation;
pub mod descriptor;
pub mod envelope;
pub mod logging;
pub mod metrics;
pub mod privacy;
pub mod resource;
pub mod sink;
pub mod telemetry;
pub mod tracing;

pub use classify::{AttributeExtractor, FailureCategory, ResultExtractor, Settled};
pub use correlation::CorrelationContext;
pub use descriptor::{
    AttrValue, Attributes, OperationDescriptor, OperationKind, OperationOutcome, OutcomeStatus,
};
pub use envelope::{Envelope, EnvelopeChain};
pub use sink::{isolate, FailureLedger, OutcomeSink, Recording, SinkError, SinkKind};
pub use telemetry::{init_subscriber, Telemetry, TelemetryError};
