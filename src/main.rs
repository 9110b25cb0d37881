//! vm-compare - side-by-side transaction latency comparison
//!
//! Times wallet connection, contract deployment, contract calls, state reads
//! and raw submissions on a UTXO VM (BVM) and an account VM (EVM), and serves
//! the results to a UI over HTTP.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};

mod api;
mod chain;
mod config;
mod error;
mod events;
mod metrics;
mod orchestrator;
mod state;
mod timer;

use chain::{ChainHandles, ChainKind};
use config::Settings;
use metrics::MetricsServer;
use orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting vm-compare v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration (sampling every {}ms, history limit {})",
        settings.app.sampling_interval_ms, settings.app.history_limit
    );

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(server)
    } else {
        None
    };

    // Wire both chains
    let bvm = ChainHandles::build(ChainKind::Bvm, settings.chains.get(ChainKind::Bvm)).await?;
    let evm = ChainHandles::build(ChainKind::Evm, settings.chains.get(ChainKind::Evm)).await?;
    info!("Chain collaborators initialized");

    let orchestrator = Arc::new(Orchestrator::new(bvm, evm, &settings.app));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(e) = api::run_server(config, orchestrator).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Notification feed for the console
    let notification_handle = tokio::spawn({
        let mut notifications = orchestrator.subscribe();
        async move {
            loop {
                match notifications.recv().await {
                    Ok(n) => {
                        debug!(
                            level = ?n.level,
                            duration = %n.duration,
                            "[{}] {}",
                            n.chain,
                            n.message
                        );
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Notification log lagged, skipped {}", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    });

    info!("vm-compare is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Abort background tasks
    api_handle.abort();
    notification_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("vm-compare stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vm_compare=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
