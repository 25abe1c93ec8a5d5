//! Service metrics
//!
//! The library only emits through the `metrics` facade; the binary installs
//! a Prometheus recorder and serves its rendering on `GET /metrics`.

use crate::ScrapeError;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

pub const TASKS_TOTAL: &str = "scrape_tasks_total";
pub const BATCHES_TOTAL: &str = "scrape_batches_total";
pub const RENDERER_LAUNCHES_TOTAL: &str = "renderer_launches_total";
pub const TASK_SECONDS: &str = "scrape_task_seconds";
pub const BATCH_SECONDS: &str = "scrape_batch_seconds";

pub fn record_task(success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "error" };
    counter!(TASKS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(TASK_SECONDS).record(duration.as_secs_f64());
}

pub fn record_batch(duration: Duration) {
    counter!(BATCHES_TOTAL).increment(1);
    histogram!(BATCH_SECONDS).record(duration.as_secs_f64());
}

pub fn record_renderer_launch() {
    counter!(RENDERER_LAUNCHES_TOTAL).increment(1);
}

/// Install the process-wide Prometheus recorder.
pub fn install_prometheus() -> Result<PrometheusHandle, ScrapeError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ScrapeError::Configuration(format!("metrics recorder: {e}")))?;
    info!("Prometheus recorder installed");
    Ok(handle)
}
