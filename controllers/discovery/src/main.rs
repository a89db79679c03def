//! Discovery Controller
//!
//! Node-local controller that keeps Loggie pipelines in sync with the
//! workloads of the node (or VM) it runs on:
//! - LogConfig / ClusterLogConfig: match selectors against local pods, the node or the VM
//! - Pod / Node / Vm: re-evaluate matching configurations when labels or readiness change
//! - Sink / Interceptor: refresh the pipelines that reference them

mod backoff;
mod config;
mod controller;
mod dispatch;
mod element;
mod error;
mod filter;
mod identity;
mod index;
mod informer;
mod metrics;
mod pattern;
mod probes;
mod queue;
mod reconcile_helpers;
mod reconciler;
mod topology;
mod worker;

#[cfg(test)]
mod test_utils;

use anyhow::Result;
use config::Config;
use controller::Controller;
use error::ControllerError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube is built against rustls without a default provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Discovery Controller");

    let config = Config::load()?;
    info!("Configuration:");
    info!("  Cluster: {}", config.cluster);
    info!("  Node: {}", config.node_name);
    info!("  Mode: {}", if config.vm_mode { "fleet" } else { "cluster" });

    let client = kube::Client::try_default().await.map_err(ControllerError::Kube)?;
    let controller = Controller::new(client, &config).await?;

    if let Some(addr) = config.probe_address {
        let state = controller.probe_state();
        tokio::spawn(async move {
            if let Err(e) = probes::serve(addr, state).await {
                error!("Probe server stopped: {}", e);
            }
        });
    }

    controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Discovery Controller stopped");
    Ok(())
}
