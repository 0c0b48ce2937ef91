//! # Definition Language
//!
//! Address definitions are recursive expressions whose content hash is the
//! owning address. This crate provides the sealed AST, the parser from the
//! wire JSON form, bounded validation (complexity and op budgets, weight
//! range checks, negation restrictions) and the pure evaluator that checks
//! a unit's authentifiers against a definition.
//!
//! State-dependent operators (`in data feed`, `attested`, `seen`, `age`,
//! delegated `address`) consult a [`StateReader`]; `formula` delegates to
//! a [`FormulaEvaluator`]. Both are traits so the evaluator itself stays a
//! pure function of its inputs.

pub mod ast;
pub mod errors;
pub mod evaluate;
pub mod state;
pub mod validate;

pub use ast::{Definition, HasFilter, HasWhat, SeenFilter};
pub use errors::DefinitionError;
pub use evaluate::{evaluate, EvalInput, EvalOutcome};
pub use state::{BasicFormulaEvaluator, FormulaEvaluator, StateReader};
pub use validate::{expand_templates, validate_definition, DefinitionInfo};
