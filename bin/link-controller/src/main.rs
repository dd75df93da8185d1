use anyhow::Result;
use kube::Client;
use link_core::{PortReservations, ReconcileMetrics, Reconciler};
use prometheus::Registry;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod import_controller;
mod kube_store;
mod metrics_server;

use config::ControllerConfig;
use import_controller::ImportController;
use kube_store::KubeStore;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting link-controller...");

    let config = ControllerConfig::from_env()?;
    info!(
        system_namespace = %config.reconciler.system_namespace,
        dataplane = %config.reconciler.dataplane_service,
        port_range = %config.reconciler.port_range,
        workers = config.workers,
        "Configuration loaded"
    );

    let registry = Arc::new(Registry::new());
    let metrics = ReconcileMetrics::new(&registry)?;

    let client = Client::try_default().await?;
    let store = Arc::new(KubeStore::new(client.clone()));
    let reconciler = Arc::new(Reconciler::new(
        store,
        Arc::new(PortReservations::new()),
        config.reconciler.clone(),
        metrics,
    ));

    // Reservations must be back in place before any Import is reconciled
    reconciler.restore().await?;

    let metrics_addr = config.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = metrics_server::serve(metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    let controller = ImportController::new(client, reconciler, config.workers, config.resync);
    tokio::select! {
        result = controller.run() => {
            if let Err(e) = result {
                error!("Import controller error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting...");
            controller.shutdown();
        }
    }

    Ok(())
}

/// Log filter from `RUST_LOG` (default `info`); `LINK_LOG_FORMAT=json`
/// switches to JSON output
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::env::var("LINK_LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init(),
    }
}
