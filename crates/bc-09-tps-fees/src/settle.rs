//! # Settlement & Sufficiency
//!
//! Two sides of the same ledger:
//!
//! - [`check_fee_sufficiency`] runs at validation: every recipient's
//!   balance at the unit's last-ball MCI plus its share of the declared
//!   fee must cover its share of the required fee.
//! - [`settle_unit`] runs inside the stabilization transaction: the net
//!   difference (declared − actual, pro-rata) is applied to each
//!   recipient's balance at the stabilized MCI. Because settlement and
//!   the advance of `last_stable_mci` commit together, no validator ever
//!   reads a stale balance for a visible MCI.

use crate::errors::TpsFeeError;
use crate::recipients::normalize_recipients;
use bc_02_object_store::{Store, StoreTx};
use shared_types::Unit;
use tracing::debug;

/// Share of `amount` owned by a `share`-percent recipient, floor division.
fn share_of(amount: u64, share: u32) -> i64 {
    ((amount as i128) * (share as i128) / 100) as i64
}

/// Validation-time check: can this unit pay the required fee at its
/// last-ball MCI?
pub fn check_fee_sufficiency(
    store: &Store,
    unit: &Unit,
    last_ball_mci: u64,
    required_fee: u64,
) -> Result<(), TpsFeeError> {
    let declared = unit.tps_fee.unwrap_or(0);
    for (address, share) in normalize_recipients(unit)? {
        let balance = store.tps_balance_at(&address, last_ball_mci)?;
        let paid = share_of(declared, share);
        let required = share_of(required_fee, share);
        if balance + paid < required {
            return Err(TpsFeeError::Insufficient {
                address,
                balance,
                paid,
                required,
            });
        }
    }
    Ok(())
}

/// Stabilization-time settlement of one newly stable unit at `mci`.
/// Balances are read through the transaction so several units settling
/// the same address at one MCI compound rather than overwrite. Returns
/// the actual fee charged, for recording on the unit props.
pub fn settle_unit(
    tx: &mut StoreTx<'_>,
    unit: &Unit,
    mci: u64,
    actual_fee: u64,
) -> Result<u64, TpsFeeError> {
    let declared = unit.tps_fee.unwrap_or(0);
    for (address, share) in normalize_recipients(unit)? {
        let prior = tx.tps_balance_at(&address, mci)?;
        let delta = share_of(declared, share) - share_of(actual_fee, share);
        let next = prior + delta;
        debug!(%address, prior, delta, mci, "tps balance settled");
        tx.set_tps_balance(&address, mci, next)?;
    }
    Ok(actual_fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_02_object_store::StoreConfig;
    use shared_types::Author;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::for_testing(dir.path().to_string_lossy())).unwrap();
        (dir, store)
    }

    fn unit_by(address: &str, tps_fee: Option<u64>) -> Unit {
        Unit {
            version: "4.0".into(),
            alt: "1".into(),
            unit: Some("U".into()),
            parent_units: vec![],
            last_ball: None,
            last_ball_unit: None,
            witness_list_unit: None,
            witnesses: None,
            timestamp: 0,
            authors: vec![Author {
                address: address.into(),
                definition: None,
                authentifiers: BTreeMap::new(),
            }],
            messages: vec![],
            earned_headers_commission_recipients: None,
            headers_commission: 0,
            payload_commission: 0,
            tps_fee,
            content_hash: None,
        }
    }

    fn seed_balance(store: &Store, address: &str, mci: u64, balance: i64) {
        let mut tx = store.begin_tx();
        tx.set_tps_balance(address, mci, balance).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn sufficiency_uses_balance_plus_declared() {
        let (_dir, store) = open_store();
        seed_balance(&store, "ALICE", 3, 400);

        // Balance 400 + declared 200 covers required 500.
        let unit = unit_by("ALICE", Some(200));
        assert!(check_fee_sufficiency(&store, &unit, 5, 500).is_ok());

        // Balance 400 + declared 50 does not.
        let unit = unit_by("ALICE", Some(50));
        assert!(matches!(
            check_fee_sufficiency(&store, &unit, 5, 500),
            Err(TpsFeeError::Insufficient { .. })
        ));
    }

    #[test]
    fn balance_lookup_takes_largest_mci_at_or_below() {
        let (_dir, store) = open_store();
        seed_balance(&store, "ALICE", 2, 100);
        seed_balance(&store, "ALICE", 6, -40);
        assert_eq!(store.tps_balance_at("ALICE", 1).unwrap(), 0);
        assert_eq!(store.tps_balance_at("ALICE", 5).unwrap(), 100);
        assert_eq!(store.tps_balance_at("ALICE", 9).unwrap(), -40);
    }

    #[test]
    fn settlement_applies_net_delta() {
        let (_dir, store) = open_store();
        seed_balance(&store, "ALICE", 1, 10);

        // Declared 300, actual 100: net +200.
        let unit = unit_by("ALICE", Some(300));
        let mut tx = store.begin_tx();
        settle_unit(&mut tx, &unit, 7, 100).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.tps_balance_at("ALICE", 7).unwrap(), 210);

        // Declared 0, actual 150: net -150, balances may go negative.
        let unit = unit_by("ALICE", None);
        let mut tx = store.begin_tx();
        settle_unit(&mut tx, &unit, 8, 150).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.tps_balance_at("ALICE", 8).unwrap(), 60);

        // Two units settling the same address at one MCI compound.
        let a = unit_by("ALICE", Some(100));
        let b = unit_by("ALICE", Some(100));
        let mut tx = store.begin_tx();
        settle_unit(&mut tx, &a, 9, 50).unwrap();
        settle_unit(&mut tx, &b, 9, 50).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.tps_balance_at("ALICE", 9).unwrap(), 160);
    }
}
