//! # Cross-Subsystem Error Types
//!
//! The validation outcome taxonomy shared by the validator, the intake
//! loop and the peer protocol surface. Subsystem-internal failures carry
//! their own `thiserror` enums and are mapped into these kinds at the
//! boundary.

use crate::entities::UnitId;
use thiserror::Error;

/// Outcome of validating a candidate joint.
///
/// The split drives persistence policy: `Joint`/`Unit` errors are terminal
/// and recorded in `known_bad_joints`; `Transient` errors park the joint in
/// `unhandled_joints` for bounded retry; `NeedParentUnits` asks the peer
/// for missing ancestry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Structurally invalid joint: malformed shape, bad hash, oversize.
    /// Never retried.
    #[error("invalid joint: {0}")]
    Joint(String),

    /// Well-formed unit violating a semantic rule. Never retried.
    #[error("invalid unit: {0}")]
    Unit(String),

    /// A rule that might be satisfied later (missing state, last-ball
    /// race). Retried until the dependency arrives or the TTL expires.
    #[error("transient: {0}")]
    Transient(String),

    /// Parents unknown to this node; the peer should be asked for them.
    #[error("need parent units: {0:?}")]
    NeedParentUnits(Vec<UnitId>),

    /// Internal failure: the in-flight transaction is rolled back, locks
    /// are released, and the error is surfaced. Always a bug when seen.
    #[error("internal: {0}")]
    Internal(String),
}

impl ValidationError {
    /// Terminal errors are persisted to `known_bad_joints` so the same
    /// joint is never re-processed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ValidationError::Joint(_) | ValidationError::Unit(_))
    }

    /// Whether the joint should be parked for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ValidationError::Transient(_))
    }

    /// Small wire code for full peers; light clients receive the full
    /// structured error.
    pub fn wire_code(&self) -> &'static str {
        match self {
            ValidationError::Joint(_) => "invalid_joint",
            ValidationError::Unit(_) => "invalid_unit",
            ValidationError::Transient(_) => "transient",
            ValidationError::NeedParentUnits(_) => "need_parents",
            ValidationError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_split() {
        assert!(ValidationError::Joint("x".into()).is_terminal());
        assert!(ValidationError::Unit("x".into()).is_terminal());
        assert!(!ValidationError::Transient("x".into()).is_terminal());
        assert!(!ValidationError::NeedParentUnits(vec![]).is_terminal());
    }

    #[test]
    fn transient_is_not_terminal() {
        let e = ValidationError::Transient("last ball just advanced".into());
        assert!(e.is_transient());
        assert_eq!(e.wire_code(), "transient");
    }
}
