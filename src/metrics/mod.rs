//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Action latency per chain and action
//! - Action outcomes by error kind
//! - Wallet balances
//! - Timer activity

use crate::chain::ChainKind;
use crate::error::ErrorKind;
use crate::orchestrator::ActionKind;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    pub static ref ACTION_LATENCY: HistogramVec = register_histogram_vec!(
        "vm_compare_action_latency_seconds",
        "Wall-clock latency of timed actions",
        &["chain", "action"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    pub static ref ACTION_OUTCOMES: CounterVec = register_counter_vec!(
        "vm_compare_actions_total",
        "Finished actions by outcome (ok or error kind)",
        &["chain", "action", "outcome"]
    ).unwrap();

    pub static ref WALLET_BALANCE: GaugeVec = register_gauge_vec!(
        "vm_compare_wallet_balance",
        "Last observed wallet balance in base units",
        &["chain"]
    ).unwrap();

    pub static ref TIMER_RUNNING: GaugeVec = register_gauge_vec!(
        "vm_compare_timer_running",
        "Open timing brackets per chain",
        &["chain"]
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

    pub async fn run(&self) -> anyhow::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

/// `kind` is `None` for a plain success
pub fn record_action(
    chain: ChainKind,
    action: ActionKind,
    elapsed_ms: u64,
    kind: Option<ErrorKind>,
) {
    let action = action.to_string();
    let outcome = kind.map(|k| k.as_str()).unwrap_or("ok");

    ACTION_LATENCY
        .with_label_values(&[chain.as_str(), &action])
        .observe(elapsed_ms as f64 / 1_000.0);
    ACTION_OUTCOMES
        .with_label_values(&[chain.as_str(), &action, outcome])
        .inc();
}

pub fn record_wallet_balance(chain: ChainKind, balance: u128) {
    WALLET_BALANCE
        .with_label_values(&[chain.as_str()])
        .set(balance as f64);
}

pub fn record_timer_started(chain: ChainKind) {
    TIMER_RUNNING.with_label_values(&[chain.as_str()]).inc();
}

pub fn record_timer_stopped(chain: ChainKind) {
    TIMER_RUNNING.with_label_values(&[chain.as_str()]).dec();
}
