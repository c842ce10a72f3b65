//! Metrics collection and export for the control plane.
//!
//! Uses the `metrics` facade crate so call sites never depend on a
//! particular exporter. When the `prometheus` feature is enabled,
//! [`init_metrics`] installs a Prometheus recorder; otherwise metrics
//! are recorded and discarded.

mod definitions;
mod recorder;

pub use definitions::*;
pub use recorder::{init_metrics, MetricsHandle, MetricsRecorderConfig};

// Re-export the facade macros for call sites.
pub use metrics::{counter, gauge, histogram};
