//! Store error types.

use thiserror::Error;

/// Failures of the persistence layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The underlying engine failed.
    #[error("storage engine error: {0}")]
    Engine(String),

    /// A stored value failed to decode; on-disk corruption or a schema
    /// mismatch.
    #[error("corrupt row at {key}: {detail}")]
    Corrupt {
        /// Printable form of the offending key.
        key: String,
        /// Decode failure detail.
        detail: String,
    },

    /// An insert violated the serial-spend uniqueness constraint.
    #[error("unique spend violation: output {src} already serially spent by {existing}")]
    UniqueViolation {
        /// `unit:message:output` triple of the contested source.
        src: String,
        /// Unit already holding the serial claim.
        existing: String,
    },

    /// A referenced row is missing where the schema requires it.
    #[error("missing row: {0}")]
    Missing(String),

    /// The configuration was rejected.
    #[error("bad store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn engine(e: rocksdb::Error) -> Self {
        StoreError::Engine(e.to_string())
    }

    pub(crate) fn corrupt(key: &[u8], detail: impl std::fmt::Display) -> Self {
        StoreError::Corrupt {
            key: String::from_utf8_lossy(key).into_owned(),
            detail: detail.to_string(),
        }
    }
}
