//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (IDENTITY_TELEMETRY_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → TelemetryConfig (validated, immutable)
//!     → handed to each component's constructor at startup
//! ```
//!
//! # Design Decisions
//! - Config is fixed for the process lifetime; there is no reload path
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_with_env, ConfigError};
pub use schema::{LogShippingConfig, MetricsConfig, ServiceConfig, TelemetryConfig, TracingConfig};
pub use validation::{validate_config, ValidationError};
