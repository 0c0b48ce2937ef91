//! # Object Store
//!
//! Persistence for the ledger core. Two logical stores share one RocksDB
//! instance, isolated by column family:
//!
//! - **Row store** (`rows` CF): typed, prefix-keyed tables - the
//!   relational side. Mutations are staged in a [`StoreTx`] and applied as
//!   one atomic batch at commit.
//! - **Ordered KV store** (`kv` CF): full joint JSON bodies and
//!   range-scannable secondary indexes (data feeds, AA state vars), written
//!   through [`KvBatch`] with a reverse batch for undo.
//!
//! The commit protocol is owned by the writer: stage rows, sync the KV
//! batch, then commit the rows; a rows-commit failure is repaired by
//! applying the KV reverse batch. In-memory caches of unit props are
//! derived state, mutated only under the `write` lock and rebuildable from
//! disk at any time via [`Store::reset_memory`].

pub mod cache;
pub mod config;
pub mod errors;
pub mod keys;
pub mod kv;
pub mod rows;
pub mod store;
pub mod tx;

pub use cache::CacheStats;
pub use config::StoreConfig;
pub use errors::StoreError;
pub use kv::KvBatch;
pub use rows::*;
pub use store::Store;
pub use tx::StoreTx;
