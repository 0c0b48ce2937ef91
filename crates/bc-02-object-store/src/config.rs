//! Store configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database directory.
    pub path: String,
    /// Concurrent read transactions. A single-connection configuration
    /// converts any long-running operation into a full-node freeze, so
    /// values below 8 are rejected at startup.
    pub max_connections: usize,
    /// fsync KV batches and row commits.
    pub sync_writes: bool,
    /// Block cache size in bytes.
    pub block_cache_size: usize,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Stable units older than `last_stable_mci - retention_window` become
    /// eligible for cache eviction.
    pub cache_retention_window: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./data/braidchain".to_string(),
            max_connections: 8,
            sync_writes: true,
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            cache_retention_window: 1000,
        }
    }
}

impl StoreConfig {
    /// Config for tests: tiny buffers, no fsync, temp path supplied by the
    /// caller.
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            max_connections: 8,
            sync_writes: false,
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            cache_retention_window: 10,
        }
    }
}
