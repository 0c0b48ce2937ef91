//! Braidchain node entry point.

use braid_telemetry::{init_telemetry, TelemetryConfig};
use node_runtime::{Node, NodeConfig};
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let telemetry = TelemetryConfig::from_env();
    let _guard = init_telemetry(&telemetry)?;

    let config = match std::env::args().nth(1) {
        Some(path) => NodeConfig::load(&PathBuf::from(path))?,
        None => {
            info!("no config file given; using defaults");
            NodeConfig::default()
        }
    };

    let node = Node::bootstrap(config)?;
    if let Some(orphan) = &node.recovery.removed_orphan {
        info!(unit = %orphan, "recovered from torn save at previous shutdown");
    }
    info!(
        port = ?node.config.port,
        last_stable_mci = node.store.last_stable_mci(),
        "node ready"
    );

    // The wire transport is a peripheral concern wired by deployments;
    // the core runs until asked to stop.
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            node.cancel.cancel();
            info!("shutting down");
        }
        Err(e) => error!(error = %e, "signal handler failed"),
    }
    Ok(())
}
