//! # Node Configuration
//!
//! One typed struct covering the whole operational surface. Loaded from a
//! JSON file, then overridden by environment variables. Validation runs
//! once at startup; configurations the node cannot run safely with are
//! refused outright rather than limped along.

use serde::{Deserialize, Serialize};
use shared_types::{Address, NetworkParams, UnitId};
use std::path::Path;
use thiserror::Error;

/// Row-locking profile of the backing engine. The stores behave
/// identically at the logical level; this survives as a compatibility
/// field selecting the row-encoding profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Server-grade engine with row-level locking.
    Mysql,
    /// Embedded engine.
    #[default]
    Sqlite,
}

/// Database tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Data directory.
    pub path: String,
    /// Connection pool size. One connection converts any long-running
    /// operation into a full-node freeze; at least 8 is required.
    pub max_connections: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data/braidchain".to_string(),
            max_connections: 8,
        }
    }
}

/// Congestion curve overrides (used by private networks; the live values
/// are governed on-chain).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TpsFeeTuning {
    /// Base fee override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_tps_fee: Option<u64>,
    /// Smoothing interval override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tps_interval: Option<u64>,
    /// Multiplier override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tps_fee_multiplier: Option<u64>,
}

/// Genesis identity for private networks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// The genesis unit id.
    pub unit: UnitId,
    /// The initial operator committee, sorted.
    pub operators: Vec<Address>,
}

/// The node's complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// TCP listener port; `None` disables inbound connections.
    pub port: Option<u16>,
    /// Advertised URL for peers.
    pub my_url: Option<String>,
    /// Route device-to-device messages (out of core scope).
    pub serve_as_hub: bool,
    /// Run as a light client (validation subset only).
    pub light: bool,
    /// Inbound connection cap.
    pub max_inbound_connections: usize,
    /// Outbound connection cap.
    pub max_outbound_connections: usize,
    /// Below this many good peers the node solicits peer lists.
    pub min_count_good_peers: usize,
    /// Backing engine profile.
    pub storage: StorageBackend,
    /// Database tuning.
    pub database: DatabaseConfig,
    /// Deep-parent search bound. Zero would mean unbounded, which this
    /// implementation refuses.
    pub max_parent_depth: u32,
    /// Dependency fan-out cap per batch.
    pub max_ready_units_per_batch: usize,
    /// Definition evaluator complexity cap.
    pub max_complexity: u32,
    /// Definition evaluator op cap.
    pub max_ops: u32,
    /// Congestion curve overrides.
    pub tps_fee: TpsFeeTuning,
    /// Genesis identity (required for private networks).
    pub genesis: Option<GenesisConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: Some(6611),
            my_url: None,
            serve_as_hub: false,
            light: false,
            max_inbound_connections: 100,
            max_outbound_connections: 10,
            min_count_good_peers: 3,
            storage: StorageBackend::default(),
            database: DatabaseConfig::default(),
            max_parent_depth: 100,
            max_ready_units_per_batch: 100,
            max_complexity: shared_types::MAX_COMPLEXITY,
            max_ops: shared_types::MAX_OPS,
            tps_fee: TpsFeeTuning::default(),
            genesis: None,
        }
    }
}

/// Configuration rejections.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read or parsed.
    #[error("cannot load config: {0}")]
    Load(String),

    /// A value the node cannot run safely with.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// Load from a JSON file and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
        let config: NodeConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections < 8 {
            return Err(ConfigError::Invalid(format!(
                "database.max_connections = {} is unsafe; at least 8 required",
                self.database.max_connections
            )));
        }
        if self.max_parent_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_parent_depth = 0 (unbounded) is refused".into(),
            ));
        }
        if self.max_ready_units_per_batch == 0 {
            return Err(ConfigError::Invalid(
                "max_ready_units_per_batch must be positive".into(),
            ));
        }
        if self.max_complexity == 0 || self.max_ops == 0 {
            return Err(ConfigError::Invalid(
                "evaluator budgets must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The network parameters this configuration pins, if any.
    pub fn network_params(&self) -> Option<NetworkParams> {
        self.genesis.as_ref().map(|g| {
            NetworkParams::private_network(g.unit.clone(), g.operators.clone())
        })
    }
}
