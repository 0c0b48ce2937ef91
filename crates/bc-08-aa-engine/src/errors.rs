//! AA engine errors.

use bc_02_object_store::StoreError;
use thiserror::Error;

/// Failures of trigger execution. A failing handler bounces its trigger;
/// a failing store aborts the stabilization transaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AaError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The agent definition could not be interpreted.
    #[error("bad agent definition for {address}: {detail}")]
    BadDefinition {
        /// The agent.
        address: String,
        /// Parse detail.
        detail: String,
    },

    /// The evaluator rejected the trigger (becomes a bounce, not an
    /// abort).
    #[error("handler bounced: {0}")]
    Bounce(String),

    /// Response unit construction failed.
    #[error("cannot build response unit: {0}")]
    ResponseBuild(String),
}
