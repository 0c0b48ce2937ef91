//! Light-server errors.

use bc_02_object_store::StoreError;
use bc_03_dag::DagError;
use thiserror::Error;

/// Structured request outcomes. Light clients receive these verbatim;
/// full peers get the short code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LightError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Graph traversal failed.
    #[error(transparent)]
    Dag(#[from] DagError),

    /// The request shape is invalid.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The matching history exceeds the response cap. Sticky per request
    /// tag: retries of the same request fail fast without re-scanning.
    #[error("history for this request exceeds {max} items")]
    TooLarge {
        /// The response cap.
        max: usize,
    },

    /// The refresh cursor is too far behind the stable point to serve
    /// without a full-history scan.
    #[error("refresh from mci {requested} refused; minimum served is {minimum}")]
    Stale {
        /// The client's cursor.
        requested: u64,
        /// Oldest cursor the server accepts.
        minimum: u64,
    },
}

impl LightError {
    /// Short code for the peer wire.
    pub fn wire_code(&self) -> &'static str {
        match self {
            LightError::Store(_) | LightError::Dag(_) => "internal",
            LightError::BadRequest(_) => "bad_request",
            LightError::TooLarge { .. } => "too_large",
            LightError::Stale { .. } => "stale",
        }
    }
}
