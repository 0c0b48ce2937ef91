//! # Writer
//!
//! The single mutating path of the node. `save_joint` persists a
//! validated joint atomically across both stores, synchronizes the
//! in-memory caches, advances the main chain and drives stabilization -
//! all under the `write` named mutex. Startup recovery repairs the one
//! window a crash can leave torn: a synced KV entry whose row commit
//! never landed.

pub mod errors;
pub mod recovery;
pub mod writer;

pub use errors::WriterError;
pub use recovery::{run_startup_recovery, RecoveryReport};
pub use writer::Writer;
