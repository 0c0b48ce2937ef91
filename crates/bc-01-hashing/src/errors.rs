//! Canonical encoding error types.

use thiserror::Error;

/// Failures of canonical encoding. All are terminal for the value being
/// encoded; none may surface as a panic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanonicalError {
    /// A value that has no canonical form: `null`, a non-finite float, or
    /// an unsupported shape.
    #[error("value has no canonical form: {0}")]
    InvalidValue(String),

    /// Nesting exceeded the recursion budget.
    #[error("nesting depth exceeded the cap of {max}")]
    DepthExceeded {
        /// The configured recursion cap.
        max: u32,
    },

    /// The input could not be converted to the JSON value model.
    #[error("serialization failed: {0}")]
    Serialization(String),
}
