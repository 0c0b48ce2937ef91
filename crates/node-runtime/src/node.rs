//! # Node Container
//!
//! Builds every subsystem in dependency order and owns the shared
//! handles. Startup order matters: parameters install first (hash
//! derivations depend on them), then the store opens, then crash recovery
//! runs, and only then does the node accept joints.

use crate::config::NodeConfig;
use crate::composer::Composer;
use crate::intake::Intake;
use bc_02_object_store::{Store, StoreConfig};
use bc_05_validation::ValidationOptions;
use bc_06_main_chain::Stabilizer;
use bc_07_writer::{run_startup_recovery, RecoveryReport, Writer};
use bc_08_aa_engine::{AaEngine, BasicAaEvaluator};
use bc_09_tps_fees::InFlightLedger;
use bc_10_light_server::LightServer;
use bc_11_sync_kernel::{CancelFlag, MutexKernel};
use shared_bus::EventBus;
use shared_types::install_network_params;
use std::sync::Arc;
use tracing::info;

/// A wired node.
pub struct Node {
    /// Node configuration.
    pub config: NodeConfig,
    /// Shared store handle.
    pub store: Store,
    /// Named-mutex kernel.
    pub kernel: MutexKernel,
    /// Lifecycle event bus.
    pub bus: EventBus,
    /// The writer.
    pub writer: Arc<Writer>,
    /// Joint intake pipeline.
    pub intake: Intake,
    /// Light-protocol server.
    pub light: LightServer,
    /// Local unit composer.
    pub composer: Composer,
    /// Cooperative shutdown flag for catch-up workers.
    pub cancel: CancelFlag,
    /// What startup recovery found.
    pub recovery: RecoveryReport,
}

impl Node {
    /// Bootstrap from configuration.
    pub fn bootstrap(config: NodeConfig) -> anyhow::Result<Node> {
        config.validate()?;

        // Parameters first: once per process, conflicting installs fail.
        if let Some(params) = config.network_params() {
            install_network_params(params)
                .map_err(|e| anyhow::anyhow!("network parameter conflict: {e}"))?;
        }

        let store = Store::open(StoreConfig {
            path: config.database.path.clone(),
            max_connections: config.database.max_connections,
            ..StoreConfig::default()
        })?;

        let recovery = run_startup_recovery(&store)?;

        let kernel = MutexKernel::new();
        let bus = EventBus::default();
        let engine = AaEngine::new(Arc::new(BasicAaEvaluator));
        let stabilizer = Stabilizer::new(Arc::new(engine));
        let writer = Arc::new(Writer::new(
            store.clone(),
            kernel.clone(),
            bus.clone(),
            stabilizer,
        ));

        let options = ValidationOptions {
            max_complexity: config.max_complexity,
            max_ops: config.max_ops,
            ..ValidationOptions::default()
        };
        let intake = Intake::new(
            store.clone(),
            kernel.clone(),
            writer.clone(),
            options,
            config.max_ready_units_per_batch,
        );
        let light = LightServer::new(store.clone(), kernel.clone());
        let composer = Composer::new(store.clone(), kernel.clone(), InFlightLedger::new());

        info!(
            last_stable_mci = store.last_stable_mci(),
            light = config.light,
            "node bootstrapped"
        );
        Ok(Node {
            config,
            store,
            kernel,
            bus,
            writer,
            intake,
            light,
            composer,
            cancel: CancelFlag::new(),
            recovery,
        })
    }
}
