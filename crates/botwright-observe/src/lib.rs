//! Observability setup for botwright services.

pub mod tracing_setup;

pub use tracing_setup::{TracingConfig, init_tracing, shutdown_tracing};
