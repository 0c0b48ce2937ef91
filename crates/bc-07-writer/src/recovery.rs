//! # Startup Recovery
//!
//! A crash between the KV sync and the row commit leaves exactly one
//! observable inconsistency: a joint body in the KV store with no row
//! record. The durable in-flight marker written before every KV sync
//! names the only unit that can be in that state, so recovery is a
//! point lookup, not a scan of the whole KV space. A bounded consistency
//! sweep over the unstable set then asserts the inverse direction (every
//! row has its KV body).

use crate::errors::WriterError;
use bc_02_object_store::Store;
use shared_types::UnitId;
use tracing::{info, warn};

/// What recovery found and did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Orphan KV joint removed, if a torn save was found.
    pub removed_orphan: Option<UnitId>,
    /// Unstable units whose row/KV pairing was verified.
    pub checked_unstable: usize,
}

/// Run recovery before the node accepts any joints.
pub fn run_startup_recovery(store: &Store) -> Result<RecoveryReport, WriterError> {
    let mut report = RecoveryReport::default();

    if let Some(unit) = store.inflight_unit()? {
        let have_row = store.unit_row(&unit)?.is_some();
        let have_kv = store.kv_joint_exists(&unit)?;
        match (have_row, have_kv) {
            (false, true) => {
                // The crash hit after the KV sync, before the row commit:
                // the unit was never saved as far as consensus is
                // concerned, so the KV body must go.
                warn!(unit = %unit, "removing orphan KV joint from torn save");
                store.kv_delete_joint(&unit)?;
                report.removed_orphan = Some(unit);
            }
            (true, false) => {
                // Rows without KV cannot be produced by the commit order;
                // this is real corruption, not a torn save.
                return Err(WriterError::Inconsistent(format!(
                    "unit {unit} has rows but no KV joint"
                )));
            }
            _ => {}
        }
        store.clear_inflight_unit()?;
    }

    // Rebuild caches from disk, then verify the bounded recovery set.
    store.reset_memory()?;
    for props in store.unstable_units_cached() {
        if !store.kv_joint_exists(&props.unit)? {
            return Err(WriterError::Inconsistent(format!(
                "unstable unit {} has no KV joint",
                props.unit
            )));
        }
        report.checked_unstable += 1;
    }
    info!(
        checked = report.checked_unstable,
        removed = report.removed_orphan.is_some(),
        "startup recovery complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_02_object_store::{keys, StoreConfig};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::for_testing(dir.path().to_string_lossy())).unwrap();
        (dir, store)
    }

    #[test]
    fn clean_store_recovers_to_empty_report() {
        let (_dir, store) = open_store();
        let report = run_startup_recovery(&store).unwrap();
        assert_eq!(report, RecoveryReport::default());
    }

    #[test]
    fn orphan_kv_joint_is_removed() {
        let (_dir, store) = open_store();
        let unit = "TORN".to_string();

        // Simulate the torn save: marker set, KV synced, no row commit.
        store.set_inflight_unit(&unit).unwrap();
        let mut kv = store.kv_batch();
        kv.put(
            keys::kv_joint(&unit),
            br#"{"unit":{"version":"4.0","alt":"1","timestamp":1,"authors":[]}}"#.to_vec(),
        )
        .unwrap();
        kv.write(true).unwrap();

        let report = run_startup_recovery(&store).unwrap();
        assert_eq!(report.removed_orphan, Some(unit.clone()));
        assert!(store.kv_get_raw(&keys::kv_joint(&unit)).unwrap().is_none());
        assert_eq!(store.inflight_unit().unwrap(), None);

        // Second run is a no-op: the unit is indistinguishable from
        // never-received.
        let report = run_startup_recovery(&store).unwrap();
        assert_eq!(report, RecoveryReport::default());
    }

    #[test]
    fn completed_save_is_left_alone() {
        let (_dir, store) = open_store();
        let unit = "DONE".to_string();
        store.set_inflight_unit(&unit).unwrap();
        // Neither rows nor KV: marker cleared, nothing else to do.
        let report = run_startup_recovery(&store).unwrap();
        assert_eq!(report.removed_orphan, None);
        assert_eq!(store.inflight_unit().unwrap(), None);
    }
}
