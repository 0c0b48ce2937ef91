//! Definition language errors.

use thiserror::Error;

/// Failures of parsing, validating or evaluating a definition. All map to
/// semantic unit errors at the validator boundary - never to panics: an
/// uncaught evaluation exception would leak the caller's locks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    /// The JSON shape is not a recognized operator application.
    #[error("malformed definition: {0}")]
    Malformed(String),

    /// The structural complexity budget was exceeded.
    #[error("complexity exceeded: {complexity} > {max}")]
    ComplexityExceeded {
        /// Accumulated complexity.
        complexity: u32,
        /// The budget.
        max: u32,
    },

    /// The evaluation op budget was exceeded.
    #[error("op count exceeded: {ops} > {max}")]
    OpsExceeded {
        /// Accumulated op count.
        ops: u32,
        /// The budget.
        max: u32,
    },

    /// A weight, weight sum, or `required` value left the exactly
    /// representable integer range.
    #[error("number out of safe range: {0}")]
    UnsafeNumber(String),

    /// An operator that cannot be proven absent appears under `not`.
    #[error("operator {0} is not allowed inside negation")]
    BannedInNegation(&'static str),

    /// A referenced template or delegated definition could not be found.
    #[error("unresolved reference: {0}")]
    Unresolved(String),

    /// The state reader failed.
    #[error("state read failed: {0}")]
    State(String),

    /// Authentifier bytes failed to decode or verify structurally.
    #[error("bad authentifier at {path}: {detail}")]
    BadAuthentifier {
        /// Signing path.
        path: String,
        /// Decode failure detail.
        detail: String,
    },
}
