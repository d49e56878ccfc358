//! Zenodo task worker
//!
//! Runs the work scheduled outside the request path:
//! 1. Post-publication tasks from the queue (indexing, DOI registration,
//!    OAI set membership, curation mails, preservation scores)
//! 2. Periodic jobs (file audit, pattern set sync, sitemap)

mod jobs;
mod worker;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zenodo_common::{config::AppConfig, metrics, Services, VERSION};

use crate::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config);

    info!("Starting Zenodo worker v{}", VERSION);

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    metrics::register_metrics();

    if config.queue.task_queue_url.is_none() {
        warn!("No task queue URL set; only tasks queued by the periodic jobs will be seen");
    }

    info!("Connecting to backends...");
    let services = Services::from_config(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        // Receivers only go away once both loops have stopped
        let _ = shutdown_tx.send(true);
    });

    let worker = Worker::new(services.clone());
    info!("Worker ready, starting queue polling...");
    tokio::join!(
        worker.run(shutdown_rx.clone()),
        jobs::run_schedule(services, shutdown_rx),
    );

    info!("Worker shutting down");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.observability.log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
