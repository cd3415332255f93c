//! Tracing, logging, metrics and job instrumentation (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Labeled job metrics backed by a Prometheus registry.
pub mod metrics;

/// Service identity used as the `service` label.
pub mod service;

/// Job execution envelope: runs work, records outcome and duration.
pub mod jobs;

pub use jobs::{JobLabels, LabeledJob, MetricsService};
pub use metrics::{JobOutcome, MetricSet, MetricsError};
pub use service::{UNKNOWN, resolve_service_name};
