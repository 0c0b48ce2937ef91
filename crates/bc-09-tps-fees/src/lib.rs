//! # TPS Fee Accounting
//!
//! Per-address credit balances that track network congestion. A unit
//! prepays a declared `tps_fee`; at stabilization the actually required
//! fee (from the smoothed throughput at that MCI) is charged and the net
//! difference lands on the recipients' balances, which may go negative.
//! Balances change ONLY inside the stabilization transaction, so every
//! node computes identical balances for identical stable state.

pub mod curve;
pub mod errors;
pub mod inflight;
pub mod recipients;
pub mod settle;

pub use curve::{min_tps_fee, min_tps_fee_tx, observed_tps_milli, observed_tps_milli_tx};
pub use errors::TpsFeeError;
pub use inflight::InFlightLedger;
pub use recipients::normalize_recipients;
pub use settle::{check_fee_sufficiency, settle_unit};
