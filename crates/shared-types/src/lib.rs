//! # Shared Types Crate
//!
//! Domain entities and cross-subsystem types for the Braidchain node.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every type that crosses a subsystem
//!   boundary (units, joints, payloads, unit properties, validation
//!   outcomes) is defined here.
//! - **Content Addressing**: units, balls and addresses are identified by
//!   hashes of their canonical form; DAG edges are plain ids, never owning
//!   references.
//! - **Exact Arithmetic**: amounts, commissions and fee balances are
//!   integers. IEEE-754 values never participate in consensus.

pub mod constants;
pub mod entities;
pub mod errors;
pub mod params;
pub mod payload;
pub mod props;

pub use constants::*;
pub use entities::*;
pub use errors::*;
pub use params::{
    install_network_params, network_params, network_params_installed, NetworkParams,
};
pub use payload::*;
pub use props::*;
