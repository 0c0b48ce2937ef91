//! Prometheus metrics registry.

use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

lazy_static! {
    /// Joints that passed the full validation pipeline.
    pub static ref UNITS_VALIDATED: IntCounter =
        register_int_counter!("braid_units_validated_total", "Units validated").unwrap();
    /// Units durably saved.
    pub static ref UNITS_SAVED: IntCounter =
        register_int_counter!("braid_units_saved_total", "Units saved").unwrap();
    /// Joints permanently rejected.
    pub static ref UNITS_REJECTED: IntCounter =
        register_int_counter!("braid_units_rejected_total", "Units rejected").unwrap();
    /// MCIs advanced to stable.
    pub static ref MCIS_STABILIZED: IntCounter =
        register_int_counter!("braid_mcis_stabilized_total", "MCIs stabilized").unwrap();
    /// AA triggers executed at stabilization.
    pub static ref AA_TRIGGERS_EXECUTED: IntCounter =
        register_int_counter!("braid_aa_triggers_total", "AA triggers executed").unwrap();
    /// Light requests answered.
    pub static ref LIGHT_REQUESTS_SERVED: IntCounter =
        register_int_counter!("braid_light_served_total", "Light requests served").unwrap();
    /// Light requests refused (too large, stale).
    pub static ref LIGHT_REQUESTS_REFUSED: IntCounter =
        register_int_counter!("braid_light_refused_total", "Light requests refused").unwrap();
    /// Saves that rolled back.
    pub static ref SAVE_FAILURES: IntCounter =
        register_int_counter!("braid_save_failures_total", "Failed saves").unwrap();
}

/// Render the default registry in the Prometheus text format.
pub fn gather_metrics() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
