//! # Autonomous Agent Engine
//!
//! Orders and executes AA triggers at stabilization. The engine plugs
//! into the stabilizer as its [`bc_06_main_chain::StabilizationHooks`]
//! implementation: triggers are collected from newly stable units in
//! (MCI, position, message index) order, secondary triggers produced by
//! handlers append to a per-MCI FIFO, and all state mutations ride the
//! stabilization transaction. Response joints are handed upward for the
//! writer to save under the same `write` lock.
//!
//! The expression evaluator itself is a trait: any deterministic
//! implementation may be plugged in. The engine guarantees the evaluator
//! sees a snapshot view and never the shared state object.

pub mod engine;
pub mod errors;
pub mod evaluator;
pub mod state_view;
pub mod trigger;

pub use engine::AaEngine;
pub use errors::AaError;
pub use evaluator::{AaEvaluator, AaOutcome, BasicAaEvaluator, ResponseIntent, StateMutation};
pub use state_view::StateView;
pub use trigger::Trigger;
