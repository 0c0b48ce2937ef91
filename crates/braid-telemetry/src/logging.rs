//! Tracing subscriber setup.

use crate::config::TelemetryConfig;
use crate::TelemetryError;
use tracing_subscriber::{fmt, EnvFilter};

/// Keeps the subscriber alive; drop order does not matter today but the
/// guard reserves the right to flush on shutdown.
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global tracing subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .map_err(|e| TelemetryError::Filter(e.to_string()))?;
    let builder = fmt().with_env_filter(filter).with_target(true);
    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    Ok(TelemetryGuard { _private: () })
}
