//! # Node Runtime
//!
//! Wires the subsystem crates into a running node: typed configuration,
//! one-shot genesis installation, the joint intake loop with dependency
//! fan-out, unit composition, and the peer protocol shapes with their
//! pre-parse size caps.

pub mod composer;
pub mod config;
pub mod genesis;
pub mod intake;
pub mod node;
pub mod protocol;
pub mod signer;

pub use composer::{ComposeError, Composer};
pub use config::{NodeConfig, StorageBackend};
pub use genesis::{build_genesis, GenesisSpec};
pub use intake::{Intake, IntakeOutcome};
pub use node::Node;
pub use signer::Ed25519Signer;
