//! Job execution envelope.
//!
//! [`MetricsService::execute_job`] runs one unit of work and records:
//!
//! - one increment of the outcome counter (`success` or `failure`), and
//! - one write of the duration gauge,
//!
//! for the same `(service, job, operation)` triple. The work's result is
//! handed back untouched: an `Err` is returned as-is and a panic keeps
//! unwinding after the metrics are written. Nothing is retried.
//!
//! Timestamps for the execution record come from the injected [`Clock`];
//! elapsed time comes from the injected [`MonotonicClock`]. Pinning the clock
//! in a test does not change measured durations.
//!
//! [`Clock`]: opstools_core::Clock
//! [`MonotonicClock`]: opstools_core::MonotonicClock

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opstools_core::{
    Settings, SharedClock, SharedMonotonicClock, Stopwatch, SystemMonotonicClock, system_clock,
};

use crate::metrics::{JobOutcome, MetricSet, MetricsError};
use crate::service::{UNKNOWN, resolve_service_name};

/// Job and operation label values for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobLabels {
    pub job: String,
    pub operation: String,
}

impl JobLabels {
    /// Explicit labels; blank values degrade to `"unknown"`.
    pub fn new(job: &str, operation: &str) -> Self {
        Self {
            job: label_or_unknown(Some(job)),
            operation: label_or_unknown(Some(operation)),
        }
    }

    /// Resolve labels for callable type `F`, preferring the explicit names.
    ///
    /// A missing operation falls back to the callable's own name and a
    /// missing job to the module or type that declares it. The fallback is
    /// read from the static type path, so the same callable always resolves
    /// to the same pair.
    pub fn resolve<F: ?Sized>(job: Option<&str>, operation: Option<&str>) -> Self {
        let (declaring, callable) = callable_identity(std::any::type_name::<F>());
        Self {
            job: label_or_unknown(job.or(declaring)),
            operation: label_or_unknown(operation.or(callable)),
        }
    }
}

/// A job that carries its labels from its definition.
///
/// ```
/// use opstools_observability::{LabeledJob, MetricSet, MetricsService};
///
/// struct NightlySync;
///
/// impl LabeledJob for NightlySync {
///     const JOB: &'static str = "Nightly";
///     const OPERATION: &'static str = "Sync";
///     type Output = usize;
///     type Error = std::io::Error;
///
///     fn run(self) -> Result<usize, std::io::Error> {
///         Ok(42)
///     }
/// }
///
/// let service = MetricsService::new(MetricSet::new("docs", "svc").unwrap());
/// assert_eq!(service.execute_labeled(NightlySync).unwrap(), 42);
/// ```
pub trait LabeledJob {
    const JOB: &'static str;
    const OPERATION: &'static str;

    type Output;
    type Error;

    fn run(self) -> Result<Self::Output, Self::Error>;
}

/// Wraps units of work with outcome and duration metrics.
#[derive(Clone)]
pub struct MetricsService {
    metrics: Arc<MetricSet>,
    clock: SharedClock,
    monotonic: SharedMonotonicClock,
}

impl MetricsService {
    /// Use `metrics` with the real clock and monotonic source.
    pub fn new(metrics: MetricSet) -> Self {
        Self {
            metrics: Arc::new(metrics),
            clock: system_clock(),
            monotonic: Arc::new(SystemMonotonicClock),
        }
    }

    /// Build the metric set from configuration (key + service label).
    pub fn from_settings(settings: &Settings) -> Result<Self, MetricsError> {
        let service = resolve_service_name(settings.service_name.as_deref());
        Ok(Self::new(MetricSet::new(settings.metrics_key.clone(), service)?))
    }

    /// Replace the clock used for execution timestamps.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the source used to measure durations.
    pub fn with_monotonic_clock(mut self, monotonic: SharedMonotonicClock) -> Self {
        self.monotonic = monotonic;
        self
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    /// Run `work`, recording its outcome and duration.
    ///
    /// `job_name` / `operation` default to the declaring scope and name of
    /// the callable (see [`JobLabels::resolve`]).
    pub fn execute_job<F, T, E>(
        &self,
        work: F,
        job_name: Option<&str>,
        operation: Option<&str>,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let labels = JobLabels::resolve::<F>(job_name, operation);
        self.execute_with_labels(labels, work)
    }

    /// Run a job that declares its own labels.
    pub fn execute_labeled<J: LabeledJob>(&self, job: J) -> Result<J::Output, J::Error> {
        self.execute_with_labels(JobLabels::new(J::JOB, J::OPERATION), || job.run())
    }

    /// Run `work` under already-resolved labels.
    pub fn execute_with_labels<F, T, E>(&self, labels: JobLabels, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let record = ExecutionRecord::start(self, labels);
        let result = work();
        record.finish(JobOutcome::from_result(&result));
        result
    }
}

impl std::fmt::Debug for MetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsService")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// One in-flight execution.
///
/// Dropping the record writes the metrics. If it is dropped without
/// [`finish`](Self::finish) having run, the work unwound and the outcome is
/// `failure`.
struct ExecutionRecord<'a> {
    metrics: &'a MetricSet,
    labels: JobLabels,
    started_at: DateTime<Utc>,
    stopwatch: Stopwatch,
    outcome: Option<JobOutcome>,
    elapsed: Option<Duration>,
}

impl<'a> ExecutionRecord<'a> {
    fn start(service: &'a MetricsService, labels: JobLabels) -> Self {
        let started_at = service.clock.utc_now();
        tracing::debug!(
            service = service.metrics.service(),
            job = %labels.job,
            operation = %labels.operation,
            started_at = %started_at,
            "executing job"
        );
        Self {
            metrics: &service.metrics,
            labels,
            started_at,
            stopwatch: Stopwatch::start(Arc::clone(&service.monotonic)),
            outcome: None,
            elapsed: None,
        }
    }

    fn finish(mut self, outcome: JobOutcome) {
        self.elapsed = Some(self.stopwatch.elapsed());
        self.outcome = Some(outcome);
    }
}

impl Drop for ExecutionRecord<'_> {
    fn drop(&mut self) {
        let elapsed = self.elapsed.unwrap_or_else(|| self.stopwatch.elapsed());
        let outcome = self.outcome.unwrap_or(JobOutcome::Failure);
        let service = self.metrics.service();

        self.metrics
            .increment_outcome(service, &self.labels.job, outcome, &self.labels.operation);
        self.metrics.set_duration(
            service,
            &self.labels.job,
            &self.labels.operation,
            elapsed.as_secs_f64(),
        );

        tracing::debug!(
            service,
            job = %self.labels.job,
            operation = %self.labels.operation,
            started_at = %self.started_at,
            result = %outcome,
            elapsed_seconds = elapsed.as_secs_f64(),
            unwound = self.outcome.is_none(),
            "job finished"
        );
    }
}

fn label_or_unknown(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Split a type path into `(declaring scope, callable name)`.
///
/// `app::reports::nightly_sync::{{closure}}` → `(Some("reports"), Some("nightly_sync"))`.
/// `<app::Nightly as app::Job>::run` → `(Some("Nightly"), Some("run"))`.
/// Generic arguments and compiler-generated segments are ignored. Anything that
/// is not a path (function pointers, references, trait objects) yields
/// `(None, None)`.
fn callable_identity(type_name: &str) -> (Option<&str>, Option<&str>) {
    if type_name.starts_with('<') {
        return qualified_identity(type_name).unwrap_or((None, None));
    }
    if !type_name.starts_with(|c: char| c.is_alphabetic() || c == '_')
        || type_name.starts_with("fn(")
        || type_name.starts_with("dyn ")
    {
        return (None, None);
    }

    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut skip_until = 0usize;

    for (idx, ch) in type_name.char_indices() {
        if idx < skip_until {
            continue;
        }
        match ch {
            '<' => {
                if depth == 0 {
                    segments.push(&type_name[start..idx]);
                }
                depth += 1;
            }
            '>' => {
                depth = depth.saturating_sub(1);
                start = idx + 1;
            }
            ':' if depth == 0 && type_name[idx..].starts_with("::") => {
                segments.push(&type_name[start..idx]);
                start = idx + 2;
                skip_until = idx + 2;
            }
            _ => {}
        }
    }
    if depth == 0 && start < type_name.len() {
        segments.push(&type_name[start..]);
    }

    let named: Vec<&str> = segments
        .into_iter()
        .filter(|segment| is_identifier(segment))
        .collect();

    match named.as_slice() {
        [] => (None, None),
        [only] => (None, Some(*only)),
        [.., scope, callable] => (Some(*scope), Some(*callable)),
    }
}

/// `<Type as Trait>::item` (or `<Type>::item`): the scope is `Type`'s own name.
fn qualified_identity(type_name: &str) -> Option<(Option<&str>, Option<&str>)> {
    let close = matching_angle(type_name)?;
    let inner = &type_name[1..close];
    let self_type = top_level_as(inner).map_or(inner, |idx| &inner[..idx]);
    let item = type_name[close + 1..].strip_prefix("::")?;

    let (_, scope) = callable_identity(self_type.trim());
    let (_, callable) = callable_identity(item);
    Some((scope, callable))
}

/// Index of the `>` closing the `<` at position 0. `->` is not a bracket.
fn matching_angle(type_name: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut previous = ' ';
    for (idx, ch) in type_name.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' if previous != '-' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
        previous = ch;
    }
    None
}

fn top_level_as(inner: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut previous = ' ';
    for (idx, ch) in inner.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' if previous != '-' => depth = depth.saturating_sub(1),
            ' ' if depth == 0 && inner[idx..].starts_with(" as ") => return Some(idx),
            _ => {}
        }
        previous = ch;
    }
    None
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
