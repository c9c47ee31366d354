use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static FINANCE_WEBHOOKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static FINANCE_API_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static FINANCE_LENDER_NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Install the Prometheus recorder and register the finance counters.
///
/// Calling this more than once is a no-op.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    let _ = METRICS_HANDLE.set(handle);

    let registry = Registry::new();

    let webhooks = IntCounterVec::new(
        Opts::new(
            "finance_webhooks_total",
            "Inbound finance webhooks by outcome",
        ),
        &["outcome"],
    )?;

    let api_requests = IntCounterVec::new(
        Opts::new(
            "finance_api_requests_total",
            "Outbound finance API requests by action and result",
        ),
        &["action", "result"],
    )?;

    let notifications = IntCounterVec::new(
        Opts::new(
            "finance_lender_notifications_total",
            "Cancellation and refund notifications sent to lenders",
        ),
        &["action", "result"],
    )?;

    registry.register(Box::new(webhooks.clone()))?;
    registry.register(Box::new(api_requests.clone()))?;
    registry.register(Box::new(notifications.clone()))?;

    let _ = PROMETHEUS_REGISTRY.set(registry);
    let _ = FINANCE_WEBHOOKS_TOTAL.set(webhooks);
    let _ = FINANCE_API_REQUESTS_TOTAL.set(api_requests);
    let _ = FINANCE_LENDER_NOTIFICATIONS_TOTAL.set(notifications);

    Ok(())
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    // Append custom prometheus metrics
    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Record how an inbound webhook was handled.
pub fn record_webhook(outcome: &str) {
    if let Some(counter) = FINANCE_WEBHOOKS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_api_request(action: &str, result: &str) {
    if let Some(counter) = FINANCE_API_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[action, result]).inc();
    }
}

pub fn record_lender_notification(action: &str, result: &str) {
    if let Some(counter) = FINANCE_LENDER_NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[action, result]).inc();
    }
}
