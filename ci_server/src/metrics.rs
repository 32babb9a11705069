//! Prometheus metrics for the HTTP surface. Pipeline metrics are emitted by
//! the pipeline crate through the same recorder.

use metrics::counter;

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received for a definition of the given hoster.
pub fn webhook_received(provider: &str) {
    counter!("ci_webhooks_received_total", "provider" => provider.to_string()).increment(1);
}

/// Record a rejected webhook.
pub fn webhook_rejected(reason: &'static str) {
    counter!("ci_webhooks_rejected_total", "reason" => reason).increment(1);
}
