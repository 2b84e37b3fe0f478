//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transaction submission and failures by kind
//! - Nonce conflicts and retries
//! - Skipped-nonce recovery progress

use crate::tx::TransactionKind;

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::Address;
use ethers::utils::to_checksum;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec, Counter,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Send path
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "qb_sender_transactions_submitted_total",
        "Total transactions accepted by the ledger API",
        &["kind"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "qb_sender_transactions_failed_total",
        "Total transactions rejected with a fatal error",
        &["kind"]
    ).unwrap();

    pub static ref SEND_LATENCY: HistogramVec = register_histogram_vec!(
        "qb_sender_send_latency_seconds",
        "Time from send request to accepted submission, retries included",
        &["kind"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Nonce handling
    pub static ref NONCE_CONFLICTS: CounterVec = register_counter_vec!(
        "qb_sender_nonce_conflicts_total",
        "Nonce conflicts by phase (allocate or submit)",
        &["phase"]
    ).unwrap();

    pub static ref RETRIES: Counter = register_counter!(
        "qb_sender_retries_total",
        "Send attempts retried after a conflict"
    ).unwrap();

    pub static ref NONCE_GAP: GaugeVec = register_gauge_vec!(
        "qb_sender_nonce_gap",
        "Stored nonce minus transaction count, when positive",
        &["address"]
    ).unwrap();

    // Recovery
    pub static ref NOOPS: CounterVec = register_counter_vec!(
        "qb_sender_recovery_noops_total",
        "Recovery no-op transactions by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref RECOVERY_RUNS: CounterVec = register_counter_vec!(
        "qb_sender_recovery_runs_total",
        "Recovery runs by outcome",
        &["outcome"]
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

    pub async fn run(&self) -> std::io::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

/// Current registry contents in the text exposition format
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

// Helper functions to record metrics

pub fn record_tx_submitted(kind: TransactionKind) {
    TX_SUBMITTED.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_tx_failed(kind: TransactionKind) {
    TX_FAILED.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_send_latency(kind: TransactionKind, latency_secs: f64) {
    SEND_LATENCY
        .with_label_values(&[kind.as_str()])
        .observe(latency_secs);
}

pub fn record_nonce_conflict(phase: &str) {
    NONCE_CONFLICTS.with_label_values(&[phase]).inc();
}

pub fn record_retry() {
    RETRIES.inc();
}

pub fn set_nonce_gap(address: Address, gap: u64) {
    NONCE_GAP
        .with_label_values(&[&to_checksum(&address, None)])
        .set(gap as f64);
}

pub fn record_noop(outcome: &str) {
    NOOPS.with_label_values(&[outcome]).inc();
}

pub fn record_recovery_run(outcome: &str) {
    RECOVERY_RUNS.with_label_values(&[outcome]).inc();
}
