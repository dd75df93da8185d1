use anyhow::Result;
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::tokio::TokioIo;
use link_policy::{PolicyEngine, PolicyMetrics};
use prometheus::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

mod admin;
mod config;

use admin::AdminState;
use config::GatewayConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting link-gateway...");

    let config = GatewayConfig::from_env()?;
    info!(
        admin_addr = %config.admin_addr,
        acl_default = %config.acl_default,
        policy_file = ?config.policy_file,
        "Configuration loaded"
    );

    let registry = Arc::new(Registry::new());
    let metrics = PolicyMetrics::new(&registry)?;
    let engine = Arc::new(PolicyEngine::new(config.acl_default).with_metrics(metrics));

    if let Some(path) = &config.policy_file {
        engine.load_snapshot(path)?;
        let listing = engine.list();
        info!(acl = listing.acl.len(), lb = listing.lb.len(), "Policy snapshot loaded");
    }

    let state = Arc::new(AdminState { engine, registry });

    let listener = TcpListener::bind(&config.admin_addr).await?;
    info!("Policy API listening on {}", config.admin_addr);

    tokio::select! {
        result = accept_connections(listener, state) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received, exiting..."),
    }

    Ok(())
}

async fn accept_connections(listener: TcpListener, state: Arc<AdminState>) -> Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| admin::handle(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving connection from {}: {}", peer_addr, e);
            }
        });
    }
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
