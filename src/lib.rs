//! Identity service telemetry library.
//!
//! Wraps identity operations in an instrumentation envelope that records one
//! correlated outcome to metrics, structured logs and trace spans.

pub mod config;
pub mod database;
pub mod identity;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::TelemetryConfig;
pub use lifecycle::Shutdown;
pub use observability::{Envelope, EnvelopeChain, Telemetry};
