//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Telemetry::start  → spawn log flusher (subscribed to Shutdown)
//! Telemetry::shutdown
//!     → Shutdown::trigger
//!     → flusher runs its final flush and exits
//!     → caller awaits the flusher handle
//! ```
//!
//! # Design Decisions
//! - A single broadcast signal; every background task subscribes before it starts
//! - Triggering twice is harmless

pub mod shutdown;

pub use shutdown::Shutdown;
