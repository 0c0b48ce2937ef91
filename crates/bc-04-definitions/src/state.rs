//! # Evaluation Seams
//!
//! The evaluator consults chain state only through [`StateReader`], and
//! delegates `formula` scripts to a [`FormulaEvaluator`]. Both are object
//! traits so the evaluator stays a pure function and the validator decides
//! which snapshot of the world the evaluation sees.

use crate::ast::SeenFilter;
use crate::errors::DefinitionError;
use serde_json::Value;
use shared_types::{Address, FeedValue};

/// Read-only view of stable chain state at a fixed last-ball MCI.
pub trait StateReader {
    /// Whether any of `oracles` posted `feed` matching `rel_op`/`value`
    /// at or before `max_mci`.
    fn data_feed_exists(
        &self,
        oracles: &[Address],
        feed: &str,
        rel_op: &str,
        value: &FeedValue,
        max_mci: u64,
    ) -> Result<bool, DefinitionError>;

    /// The definition currently governing `address` at `max_mci`, in wire
    /// JSON form.
    fn definition_at(&self, address: &str, max_mci: u64)
        -> Result<Option<Value>, DefinitionError>;

    /// Whether `address` holds an attestation by one of `attestors` at or
    /// before `max_mci`.
    fn is_attested(
        &self,
        address: &str,
        attestors: &[Address],
        max_mci: u64,
    ) -> Result<bool, DefinitionError>;

    /// Whether a stable unit matching the filter exists at or before
    /// `max_mci`.
    fn seen_unit_matching(
        &self,
        filter: &SeenFilter,
        max_mci: u64,
    ) -> Result<bool, DefinitionError>;

    /// Age of `address` in MCIs at `max_mci`: distance from the MCI where
    /// the address first appeared on the stable DAG. `None` when unseen.
    fn address_age_mcis(
        &self,
        address: &str,
        max_mci: u64,
    ) -> Result<Option<u64>, DefinitionError>;
}

/// Deterministic formula evaluation. The implementation must be a pure
/// function of the formula text and the supplied MCI; two nodes with the
/// same stable state must agree on every result.
pub trait FormulaEvaluator {
    /// Evaluate `formula` in the context of `last_ball_mci`.
    fn evaluate_formula(
        &self,
        formula: &str,
        last_ball_mci: u64,
    ) -> Result<bool, DefinitionError>;
}

/// Minimal built-in formula evaluator: integer comparisons of the form
/// `<int> <op> <int>`. Anything else is rejected as malformed, never
/// guessed at.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicFormulaEvaluator;

impl FormulaEvaluator for BasicFormulaEvaluator {
    fn evaluate_formula(
        &self,
        formula: &str,
        _last_ball_mci: u64,
    ) -> Result<bool, DefinitionError> {
        let tokens: Vec<&str> = formula.split_whitespace().collect();
        let [lhs, op, rhs] = tokens.as_slice() else {
            return Err(DefinitionError::Malformed(format!(
                "unsupported formula {formula:?}"
            )));
        };
        let lhs: i64 = lhs
            .parse()
            .map_err(|_| DefinitionError::Malformed(format!("bad operand {lhs:?}")))?;
        let rhs: i64 = rhs
            .parse()
            .map_err(|_| DefinitionError::Malformed(format!("bad operand {rhs:?}")))?;
        match *op {
            "==" | "=" => Ok(lhs == rhs),
            "!=" => Ok(lhs != rhs),
            ">" => Ok(lhs > rhs),
            ">=" => Ok(lhs >= rhs),
            "<" => Ok(lhs < rhs),
            "<=" => Ok(lhs <= rhs),
            other => Err(DefinitionError::Malformed(format!(
                "unknown formula op {other:?}"
            ))),
        }
    }
}
