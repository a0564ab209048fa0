//! Shared configuration, error types, IDs, and observability primitives for flowplan crates.
//!
//! Architecture role:
//! - defines engine configuration and the namespaced runtime key/value map
//!   threaded from authoring through build and run
//! - provides common [`FlowError`] / [`Result`] contracts
//! - hosts the prometheus-backed [`MetricsRegistry`]
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::{keys, EngineConfig, RuntimeConfig};
pub use error::{FlowError, Result};
pub use ids::*;
pub use metrics::MetricsRegistry;
