//! # Composer In-Flight Ledger
//!
//! A single process composing units back-to-back must not count the same
//! credit twice: the first composition's debit is not yet on any balance
//! row (it lands at stabilization), so the composer subtracts its own
//! in-flight debits from every balance it reads. Entries drain when the
//! debiting unit stabilizes or is abandoned.

use bc_02_object_store::{Store, StoreError};
use parking_lot::Mutex;
use shared_types::{Address, UnitId};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Inner {
    /// address → (unit → pending debit).
    pending: HashMap<Address, HashMap<UnitId, u64>>,
}

/// Process-local pending debit tracking. Cheap to clone; clones share
/// state.
#[derive(Clone, Default)]
pub struct InFlightLedger {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl InFlightLedger {
    /// Fresh, empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a composed-but-unstable debit against `address`.
    pub fn note_composed(&self, address: &Address, unit: &UnitId, debit: u64) {
        let mut inner = self.inner.lock();
        inner
            .pending
            .entry(address.clone())
            .or_default()
            .insert(unit.clone(), debit);
    }

    /// Drop the entry for a unit that stabilized (its debit is now on a
    /// balance row) or was abandoned.
    pub fn note_settled(&self, unit: &UnitId) {
        let mut inner = self.inner.lock();
        inner.pending.retain(|_, units| {
            units.remove(unit);
            !units.is_empty()
        });
    }

    /// Sum of pending debits for `address`.
    pub fn pending_debit(&self, address: &str) -> u64 {
        let inner = self.inner.lock();
        inner
            .pending
            .get(address)
            .map(|units| units.values().sum())
            .unwrap_or(0)
    }

    /// The balance the composer may spend: the stored balance at `mci`
    /// minus this process's own in-flight debits.
    pub fn available_balance(
        &self,
        store: &Store,
        address: &str,
        mci: u64,
    ) -> Result<i64, StoreError> {
        let stored = store.tps_balance_at(address, mci)?;
        Ok(stored - self.pending_debit(address) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_02_object_store::StoreConfig;
    use tempfile::TempDir;

    #[test]
    fn pending_debits_accumulate_and_drain() {
        let ledger = InFlightLedger::new();
        let alice = "ALICE".to_string();
        ledger.note_composed(&alice, &"U1".to_string(), 500);
        ledger.note_composed(&alice, &"U2".to_string(), 100);
        assert_eq!(ledger.pending_debit("ALICE"), 600);

        ledger.note_settled(&"U1".to_string());
        assert_eq!(ledger.pending_debit("ALICE"), 100);
        ledger.note_settled(&"U2".to_string());
        assert_eq!(ledger.pending_debit("ALICE"), 0);
    }

    #[test]
    fn available_balance_subtracts_inflight() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::for_testing(dir.path().to_string_lossy())).unwrap();
        let mut tx = store.begin_tx();
        tx.set_tps_balance("ALICE", 1, 600).unwrap();
        tx.commit().unwrap();

        let ledger = InFlightLedger::new();
        assert_eq!(ledger.available_balance(&store, "ALICE", 5).unwrap(), 600);

        ledger.note_composed(&"ALICE".to_string(), &"U1".to_string(), 500);
        assert_eq!(ledger.available_balance(&store, "ALICE", 5).unwrap(), 100);
    }
}
