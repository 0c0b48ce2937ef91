//! # Braid Telemetry
//!
//! Observability for the node: structured logging via `tracing`, a
//! Prometheus metrics registry, and a bounded breadcrumb buffer that
//! keeps the last moments before an internal failure.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BRAID_LOG` | `info` | Log level filter |
//! | `BRAID_LOG_JSON` | unset | JSON log lines when set |

mod breadcrumbs;
mod config;
mod logging;
mod metrics;

pub use breadcrumbs::BreadcrumbBuffer;
pub use config::TelemetryConfig;
pub use logging::{init_telemetry, TelemetryGuard};
pub use metrics::{
    gather_metrics, AA_TRIGGERS_EXECUTED, LIGHT_REQUESTS_REFUSED, LIGHT_REQUESTS_SERVED,
    MCIS_STABILIZED, SAVE_FAILURES, UNITS_REJECTED, UNITS_SAVED, UNITS_VALIDATED,
};

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The subscriber could not be installed (usually a second init).
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    /// The filter directive did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
}
