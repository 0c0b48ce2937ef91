//! Writer errors.

use bc_02_object_store::StoreError;
use bc_06_main_chain::McError;
use thiserror::Error;

/// Failures of the persistence path. Every variant implies the attempted
/// write was rolled back and the caches rebuilt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriterError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Main-chain advance or stabilization failed.
    #[error(transparent)]
    Mc(#[from] McError),

    /// A response joint could not be adopted.
    #[error("cannot adopt response joint: {0}")]
    ResponseAdoption(String),

    /// Invariant breach inside the writer; always a bug.
    #[error("writer inconsistency: {0}")]
    Inconsistent(String),
}
