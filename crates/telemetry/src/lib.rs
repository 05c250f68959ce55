#![deny(unused)]
//! Observability for Devbox.
//!
//! This crate provides:
//! - Tracing subscriber setup (plain or JSON output)
//! - Prometheus metrics recorder and helpers

pub mod metrics;
pub mod tracing_layer;

pub use metrics::{setup_metrics_recorder, track_request, track_sandbox_op};
pub use tracing_layer::configure_tracing;
