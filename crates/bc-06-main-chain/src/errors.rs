//! Main-chain errors.

use bc_02_object_store::StoreError;
use bc_03_dag::DagError;
use bc_09_tps_fees::TpsFeeError;
use thiserror::Error;

/// Failures of main-chain maintenance and stabilization. Any of these
/// rolls back the whole stabilization transaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum McError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Graph traversal failed.
    #[error(transparent)]
    Dag(#[from] DagError),

    /// Fee settlement failed.
    #[error(transparent)]
    Tps(#[from] TpsFeeError),

    /// A stabilization hook (AA engine) failed.
    #[error("stabilization hook failed: {0}")]
    Hook(String),

    /// The graph is in a state the algorithm does not expect; always a
    /// bug upstream (saved units imply saved parents).
    #[error("inconsistent graph: {0}")]
    Inconsistent(String),
}
