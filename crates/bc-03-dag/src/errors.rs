//! Graph traversal errors.

use bc_02_object_store::StoreError;
use thiserror::Error;

/// Failures of DAG traversal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DagError {
    /// The store failed underneath the walk.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A referenced unit has no props row; the graph is expected to be
    /// closed under parent edges once a unit is saved.
    #[error("unknown unit {0}")]
    UnknownUnit(String),
}
