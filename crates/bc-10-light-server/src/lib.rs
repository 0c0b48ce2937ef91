//! # Light-Client Server
//!
//! Serves the three proofs a light client needs - history relevant to its
//! addresses, the witness-majority chain, and address definitions - plus
//! incremental refresh. Every operation returns a structured result;
//! nothing here panics across the request boundary, and every scan is
//! bounded at the storage layer rather than filtered after the fact.

pub mod errors;
pub mod history;
pub mod proof;
pub mod server;

pub use errors::LightError;
pub use history::{HistoryRequest, HistoryResponse, ProofBall};
pub use proof::WitnessProof;
pub use server::LightServer;
