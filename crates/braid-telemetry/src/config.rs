//! Telemetry configuration.

use serde::{Deserialize, Serialize};

/// How the node reports on itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `tracing` filter directive, e.g. `info` or `bc_05_validation=debug`.
    pub log_filter: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
    /// Breadcrumb records kept in memory.
    pub breadcrumb_capacity: usize,
    /// Bytes a single breadcrumb record is truncated to before buffering.
    pub breadcrumb_max_bytes: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            json_logs: false,
            breadcrumb_capacity: 200,
            breadcrumb_max_bytes: 10 * 1024,
        }
    }
}

impl TelemetryConfig {
    /// Read overrides from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("BRAID_LOG") {
            if !filter.is_empty() {
                config.log_filter = filter;
            }
        }
        if std::env::var("BRAID_LOG_JSON").is_ok() {
            config.json_logs = true;
        }
        config
    }
}
