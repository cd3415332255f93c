//! End-to-end: configuration → envelope → scrape text.

use std::sync::Arc;
use std::time::Duration;

use opstools_core::{ManualMonotonicClock, Settings};
use opstools_observability::{JobOutcome, MetricsService};

fn settings(key: &str) -> Settings {
    Settings::from_lookup(|name| match name {
        "OPSTOOLS_METRICS_KEY" => Some(key.to_string()),
        "OPSTOOLS_SERVICE_NAME" => Some("scrape-test".to_string()),
        _ => None,
    })
    .expect("valid settings")
}

#[test]
fn scrape_reflects_both_outcomes() -> anyhow::Result<()> {
    let monotonic = Arc::new(ManualMonotonicClock::new());
    let service = MetricsService::from_settings(&settings("nightly"))?
        .with_monotonic_clock(monotonic.clone());

    service.execute_job(
        || {
            monotonic.advance(Duration::from_secs(2));
            Ok::<_, std::io::Error>(())
        },
        Some("Nightly"),
        Some("Sync"),
    )?;

    let failed = service.execute_job(
        || {
            monotonic.advance(Duration::from_secs(1));
            Err::<(), _>(std::io::Error::other("remote closed"))
        },
        Some("Nightly"),
        Some("Sync"),
    );
    assert_eq!(failed.unwrap_err().to_string(), "remote closed");

    let metrics = service.metrics();
    assert_eq!(
        metrics.outcome_count("scrape-test", "Nightly", JobOutcome::Success, "Sync"),
        1
    );
    assert_eq!(
        metrics.outcome_count("scrape-test", "Nightly", JobOutcome::Failure, "Sync"),
        1
    );
    assert_eq!(
        metrics.duration_seconds("scrape-test", "Nightly", "Sync"),
        Some(1.0)
    );

    let text = metrics.render()?;
    assert!(text.contains(
        r#"nightly_job_counter{job="Nightly",operation="Sync",result="success",service="scrape-test"} 1"#
    ));
    assert!(text.contains(
        r#"nightly_workflow_duration_seconds{job="Nightly",operation="Sync",service="scrape-test"} 1"#
    ));
    Ok(())
}

#[test]
fn init_then_execute_logs_without_panicking() -> anyhow::Result<()> {
    opstools_observability::init();
    let service = MetricsService::from_settings(&settings("logged"))?;

    let value = service.execute_job(|| Ok::<_, std::io::Error>(5), Some("Log"), Some("Check"))?;
    assert_eq!(value, 5);
    Ok(())
}
