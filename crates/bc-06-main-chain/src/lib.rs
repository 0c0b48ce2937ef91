//! # Main Chain & Stability
//!
//! The main chain is the best-child walk from genesis; every unit's MCI is
//! the index of the first main-chain unit that includes it. Stability
//! advances when all free tips funnel their best-parent chains through a
//! candidate and an operator majority has witnessed past it.
//!
//! Stabilization of an MCI is one transaction: sequence resolution
//! (double-spend tie-breaks), ball assignment, governance tallies, data
//! feed indexing, AA trigger queueing and TPS fee settlement all commit
//! together with the advance of `last_stable_mci` - a validator can never
//! observe an MCI whose side effects are still pending.

pub mod advance;
pub mod errors;
pub mod hooks;
pub mod stability;
pub mod stabilizer;

pub use advance::advance_main_chain;
pub use errors::McError;
pub use hooks::{NoopHooks, StabilizationHooks, StabilizedUnit};
pub use stability::{next_stable_candidate, stable_in_view_of};
pub use stabilizer::{AdvanceOutcome, Stabilizer};
