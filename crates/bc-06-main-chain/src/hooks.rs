//! # Stabilization Hooks
//!
//! The stabilizer drives subsystems that must act inside the
//! stabilization transaction (the AA trigger engine) through this trait,
//! keeping the dependency arrow pointed at the main chain rather than out
//! of it. Hook state mutations ride the same transaction; response joints
//! the hook produces are returned upward and saved by the writer while it
//! still holds the `write` lock.

use crate::errors::McError;
use bc_02_object_store::{KvBatch, Store, StoreTx};
use shared_types::{Joint, Sequence, UnitId};

/// A unit that just became stable, with its resolved ordering data.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilizedUnit {
    /// The unit id.
    pub unit: UnitId,
    /// Its assigned MCI.
    pub mci: u64,
    /// Deterministic position within the MCI (main-chain inclusion order).
    pub position: u32,
    /// Resolved sequence after tie-breaks.
    pub sequence: Sequence,
}

/// Work performed inside the stabilization transaction.
pub trait StabilizationHooks: Send + Sync {
    /// Called once per newly stable MCI, after sequence resolution, ball
    /// assignment and fee settlement are staged but before commit.
    /// Returns response joints to be saved by the writer under the same
    /// `write` lock.
    fn on_mci_stabilized(
        &self,
        store: &Store,
        tx: &mut StoreTx<'_>,
        kv: &mut KvBatch<'_>,
        mci: u64,
        stabilized: &[StabilizedUnit],
    ) -> Result<Vec<Joint>, McError>;
}

/// Hooks that do nothing; used by nodes without AA execution and in
/// graph-only tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl StabilizationHooks for NoopHooks {
    fn on_mci_stabilized(
        &self,
        _store: &Store,
        _tx: &mut StoreTx<'_>,
        _kv: &mut KvBatch<'_>,
        _mci: u64,
        _stabilized: &[StabilizedUnit],
    ) -> Result<Vec<Joint>, McError> {
        Ok(Vec::new())
    }
}
