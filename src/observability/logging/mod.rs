//! Structured log emitter.
//!
//! # Data Flow
//! ```text
//! settled outcome
//!     → record.rs (LogRecord per kind, privacy policy applied)
//!     → emitter.rs (bounded buffer, mirrored to the `tracing` audit target)
//!     → single background flusher (timer, size threshold, shutdown)
//!     → transport.rs (Loki push API or stdout JSON lines)
//! ```
//!
//! # Design Decisions
//! - `emit` is synchronous and never waits on the network
//! - Overflow drops the oldest record; exhausted retries drop the batch
//! - Both losses are counted, neither reaches business code

pub mod emitter;
pub mod record;
pub mod transport;

pub use emitter::{EmitterSettings, EmitterStats, FlushReport, LogEmitter};
pub use record::{LogLevel, LogRecord};
pub use transport::{LogTransport, LokiTransport, StdoutTransport, TransportError};
