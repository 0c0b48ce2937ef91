//! # Braidchain Test Suite
//!
//! End-to-end consensus scenarios over a real store and the full
//! subsystem stack: genesis bootstrap, payments, double-spend tie-breaks,
//! key rotation, light proofs, fee races, crash recovery and cross-node
//! determinism.
//!
//! Every test shares ONE network identity (fixed operator keys, fixed
//! genesis timestamp): network parameters install process-wide exactly
//! once, and a second install with different values is refused by design.

pub mod fixture;

#[cfg(test)]
mod integration {
    mod aa_engine;
    mod crash_recovery;
    mod definition_change;
    mod determinism;
    mod double_spend;
    mod genesis_payment;
    mod light_proofs;
    mod tps_fees;
}
