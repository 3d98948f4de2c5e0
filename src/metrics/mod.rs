//! Prometheus metrics for monitoring
//!
//! Every series is labelled by relay direction (`"chain-a -> chain-b"`) or,
//! for subscription metrics, by source chain name.

use crate::error::RelayerResult;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Subscription metrics
    pub static ref SUBSCRIPTIONS_OPENED: CounterVec = register_counter_vec!(
        "bridge_relayer_subscriptions_opened_total",
        "Deposit log subscriptions successfully opened",
        &["chain"]
    ).unwrap();

    pub static ref SUBSCRIPTION_ERRORS: CounterVec = register_counter_vec!(
        "bridge_relayer_subscription_errors_total",
        "Failed attempts to open a deposit log subscription",
        &["chain"]
    ).unwrap();

    // Event metrics
    pub static ref LOGS_RECEIVED: CounterVec = register_counter_vec!(
        "bridge_relayer_logs_received_total",
        "Raw deposit logs delivered by the source subscription",
        &["direction"]
    ).unwrap();

    pub static ref EVENTS_MALFORMED: CounterVec = register_counter_vec!(
        "bridge_relayer_events_malformed_total",
        "Logs dropped because they did not decode as deposits",
        &["direction"]
    ).unwrap();

    pub static ref EVENTS_SKIPPED: CounterVec = register_counter_vec!(
        "bridge_relayer_events_skipped_total",
        "Deposits skipped without submitting a transaction",
        &["direction", "reason"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "bridge_relayer_transactions_submitted_total",
        "Mirrored transactions broadcast to the destination",
        &["direction"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "bridge_relayer_transactions_confirmed_total",
        "Mirrored transactions included with success status",
        &["direction"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "bridge_relayer_transactions_failed_total",
        "Deposits whose relay ended in failure, by failing stage",
        &["direction", "stage"]
    ).unwrap();

    pub static ref RELAY_LATENCY: HistogramVec = register_histogram_vec!(
        "bridge_relayer_relay_latency_seconds",
        "Time from decoded deposit to confirmed mirror transaction",
        &["direction"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Encode every registered metric in the text exposition format
fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// Helper functions to record metrics

pub fn record_subscription_opened(chain: &str) {
    SUBSCRIPTIONS_OPENED.with_label_values(&[chain]).inc();
}

pub fn record_subscription_error(chain: &str) {
    SUBSCRIPTION_ERRORS.with_label_values(&[chain]).inc();
}

pub fn record_log_received(direction: &str) {
    LOGS_RECEIVED.with_label_values(&[direction]).inc();
}

pub fn record_event_malformed(direction: &str) {
    EVENTS_MALFORMED.with_label_values(&[direction]).inc();
}

pub fn record_event_skipped(direction: &str, reason: &str) {
    EVENTS_SKIPPED.with_label_values(&[direction, reason]).inc();
}

pub fn record_tx_submitted(direction: &str) {
    TX_SUBMITTED.with_label_values(&[direction]).inc();
}

pub fn record_tx_confirmed(direction: &str) {
    TX_CONFIRMED.with_label_values(&[direction]).inc();
}

pub fn record_tx_failed(direction: &str, stage: &str) {
    TX_FAILED.with_label_values(&[direction, stage]).inc();
}

pub fn record_relay_latency(direction: &str, latency_secs: f64) {
    RELAY_LATENCY
        .with_label_values(&[direction])
        .observe(latency_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_exposes_recorded_series() {
        record_event_skipped("metrics-test", "already_processed");
        record_tx_failed("metrics-test", "inclusion");

        let text = render().unwrap();
        assert!(text.contains("bridge_relayer_events_skipped_total"));
        assert!(text.contains(r#"reason="already_processed""#));
        assert!(text.contains(r#"stage="inclusion""#));
    }
}
