//! Job outcome counter and duration gauge.
//!
//! Metric names are derived from a namespace key:
//!
//! | metric | kind | labels |
//! |---|---|---|
//! | `<key>_job_counter` | counter | `service`, `job`, `result`, `operation` |
//! | `<key>_workflow_duration_seconds` | gauge | `service`, `job`, `operation` |
//!
//! The counter only ever grows. The gauge holds the most recent duration per
//! label tuple and is overwritten on every write. Per-key atomicity comes from
//! the Prometheus metric vectors; no extra locking is added here.

use prometheus::proto::{LabelPair, MetricFamily};
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

pub const COUNTER_SUFFIX: &str = "_job_counter";
pub const GAUGE_SUFFIX: &str = "_workflow_duration_seconds";

const COUNTER_LABELS: [&str; 4] = ["service", "job", "result", "operation"];
const GAUGE_LABELS: [&str; 3] = ["service", "job", "operation"];

/// Errors raised while building or exporting the metric set.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("metric export failed: {0}")]
    Export(#[source] prometheus::Error),

    #[error("metric exposition is not valid utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Result of a single job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOutcome {
    Success,
    Failure,
}

impl JobOutcome {
    /// Value of the `result` label.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Failure => "failure",
        }
    }

    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            JobOutcome::Success
        } else {
            JobOutcome::Failure
        }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two job metrics for one logical service.
#[derive(Clone)]
pub struct MetricSet {
    registry: Registry,
    key: String,
    service: String,
    job_counter: IntCounterVec,
    duration_gauge: GaugeVec,
}

impl MetricSet {
    /// Build the metric set in its own registry.
    pub fn new(key: impl Into<String>, service: impl Into<String>) -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new(), key, service)
    }

    /// Build the metric set inside an existing (possibly shared) registry.
    ///
    /// Registering the same key twice in one registry fails.
    pub fn with_registry(
        registry: Registry,
        key: impl Into<String>,
        service: impl Into<String>,
    ) -> Result<Self, MetricsError> {
        let key = key.into();
        let service = service.into();

        let job_counter = IntCounterVec::new(
            Opts::new(
                format!("{key}{COUNTER_SUFFIX}"),
                "Measuring number of runs for a given job/operation",
            ),
            &COUNTER_LABELS,
        )?;
        let duration_gauge = GaugeVec::new(
            Opts::new(
                format!("{key}{GAUGE_SUFFIX}"),
                "Measuring duration in seconds for a given job/operation",
            ),
            &GAUGE_LABELS,
        )?;

        registry.register(Box::new(job_counter.clone()))?;
        registry.register(Box::new(duration_gauge.clone()))?;

        tracing::debug!(key = %key, service = %service, "registered job metrics");

        Ok(Self {
            registry,
            key,
            service,
            job_counter,
            duration_gauge,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Service label this set was constructed with.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn counter_name(&self) -> String {
        format!("{}{COUNTER_SUFFIX}", self.key)
    }

    pub fn gauge_name(&self) -> String {
        format!("{}{GAUGE_SUFFIX}", self.key)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Add one to the outcome counter for the given labels.
    pub fn increment_outcome(
        &self,
        service: &str,
        job: &str,
        outcome: JobOutcome,
        operation: &str,
    ) {
        self.job_counter
            .with_label_values(&[service, job, outcome.as_str(), operation])
            .inc();
    }

    /// Overwrite the duration gauge for the given labels.
    pub fn set_duration(&self, service: &str, job: &str, operation: &str, seconds: f64) {
        self.duration_gauge
            .with_label_values(&[service, job, operation])
            .set(seconds);
    }

    /// Current counter value; `0` for a label tuple that was never incremented.
    ///
    /// Reads go through `gather()` so that looking up a tuple never creates it.
    pub fn outcome_count(
        &self,
        service: &str,
        job: &str,
        outcome: JobOutcome,
        operation: &str,
    ) -> u64 {
        let labels = [
            ("service", service),
            ("job", job),
            ("result", outcome.as_str()),
            ("operation", operation),
        ];
        self.find(&self.counter_name(), &labels)
            .map(|value| value as u64)
            .unwrap_or(0)
    }

    /// Most recent duration in seconds, if one was ever recorded.
    pub fn duration_seconds(&self, service: &str, job: &str, operation: &str) -> Option<f64> {
        let labels = [("service", service), ("job", job), ("operation", operation)];
        self.find(&self.gauge_name(), &labels)
    }

    /// Prometheus text exposition of everything in the registry.
    pub fn render(&self) -> Result<String, MetricsError> {
        encode_text(&self.registry.gather())
    }

    fn find(&self, family_name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let families = self.registry.gather();
        let family = families.iter().find(|f| f.get_name() == family_name)?;
        family
            .get_metric()
            .iter()
            .find(|metric| labels_match(metric.get_label(), labels))
            .map(|metric| metric_value(family, metric))
    }
}

impl std::fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSet")
            .field("key", &self.key)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

fn encode_text(families: &[MetricFamily]) -> Result<String, MetricsError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(families, &mut buffer)
        .map_err(MetricsError::Export)?;
    Ok(String::from_utf8(buffer)?)
}

fn labels_match(actual: &[LabelPair], expected: &[(&str, &str)]) -> bool {
    actual.len() == expected.len()
        && expected.iter().all(|(name, value)| {
            actual
                .iter()
                .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
        })
}

fn metric_value(family: &MetricFamily, metric: &prometheus::proto::Metric) -> f64 {
    match family.get_field_type() {
        prometheus::proto::MetricType::COUNTER => metric.get_counter().get_value(),
        _ => metric.get_gauge().get_value(),
    }
}
