//! Metric points emitted by the pipeline. The server installs the exporter.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::build::BuildStatus;

/// Record a finished run and its wall-clock duration.
pub fn build_finished(status: BuildStatus, duration: Duration) {
    counter!("ci_builds_total", "status" => status.as_str()).increment(1);
    histogram!("ci_build_duration_ms").record(duration.as_millis() as f64);
}

/// Record how long one stage took.
pub fn stage_duration(stage: &str, duration: Duration) {
    histogram!("ci_stage_duration_ms", "stage" => stage.to_string())
        .record(duration.as_millis() as f64);
}

pub fn deployment_failed(channel: &'static str) {
    counter!("ci_deployment_failures_total", "channel" => channel).increment(1);
}
