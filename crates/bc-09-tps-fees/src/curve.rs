//! # Congestion Curve
//!
//! The required fee grows with observed throughput. Throughput is
//! milli-TPS measured over the trailing main-chain units at the reference
//! MCI - stable state only, so every node measures the same value. All
//! arithmetic is integer; IEEE-754 never touches fee amounts.

use bc_02_object_store::{Store, StoreError};
use shared_types::SystemSubject;

/// How many trailing main-chain units enter the throughput window.
const WINDOW_UNITS: u64 = 20;

/// Observed throughput at `mci`, in milli-TPS (units×1000 per second),
/// measured over the last [`WINDOW_UNITS`] main-chain units. Returns 0
/// below two units of history.
pub fn observed_tps_milli(store: &Store, mci: u64) -> Result<u64, StoreError> {
    let from = mci.saturating_sub(WINDOW_UNITS);
    let mut first_ts: Option<u64> = None;
    let mut last_ts: Option<u64> = None;
    let mut count: u64 = 0;
    for index in from..=mci {
        let Some(unit) = store.mc_unit_at(index)? else {
            continue;
        };
        let Some(props) = store.unit_props(&unit)? else {
            continue;
        };
        if first_ts.is_none() {
            first_ts = Some(props.timestamp);
        }
        last_ts = Some(props.timestamp);
        count += 1;
    }
    let (Some(first), Some(last)) = (first_ts, last_ts) else {
        return Ok(0);
    };
    if count < 2 {
        return Ok(0);
    }
    let span = last.saturating_sub(first).max(1);
    Ok(count.saturating_mul(1000) / span)
}

/// Throughput as seen through an open stabilization transaction: the
/// main-chain rows staged in it count too. The stabilizer MUST use this
/// variant - a node stabilizing three MCIs in one batch and a node doing
/// them one-per-batch must measure the same window, which only the merged
/// (staged + committed) view provides.
pub fn observed_tps_milli_tx(tx: &bc_02_object_store::StoreTx<'_>, mci: u64) -> Result<u64, StoreError> {
    let from = mci.saturating_sub(WINDOW_UNITS);
    let mut first_ts: Option<u64> = None;
    let mut last_ts: Option<u64> = None;
    let mut count: u64 = 0;
    for index in from..=mci {
        let Some(unit) = tx
            .get_raw(&bc_02_object_store::keys::mc_unit(index))?
            .map(|b| String::from_utf8_lossy(&b).into_owned())
        else {
            continue;
        };
        let Some(props) = tx.unit_props(&unit)? else {
            continue;
        };
        if first_ts.is_none() {
            first_ts = Some(props.timestamp);
        }
        last_ts = Some(props.timestamp);
        count += 1;
    }
    let (Some(first), Some(last)) = (first_ts, last_ts) else {
        return Ok(0);
    };
    if count < 2 {
        return Ok(0);
    }
    let span = last.saturating_sub(first).max(1);
    Ok(count.saturating_mul(1000) / span)
}

/// The required fee for one unit given throughput and the governed curve
/// parameters at the reference MCI:
///
/// ```text
/// min_fee = base + base * tps_milli * multiplier / (1000 * tps_interval)
/// ```
///
/// At zero load the fee is the base fee; it grows linearly with measured
/// throughput, scaled by the governed multiplier and smoothed by the
/// governed interval.
pub fn min_tps_fee(store: &Store, mci: u64) -> Result<u64, StoreError> {
    let tps_milli = observed_tps_milli(store, mci)?;
    fee_from_curve(store, mci, tps_milli)
}

/// [`min_tps_fee`] through an open stabilization transaction.
pub fn min_tps_fee_tx(
    store: &Store,
    tx: &bc_02_object_store::StoreTx<'_>,
    mci: u64,
) -> Result<u64, StoreError> {
    let tps_milli = observed_tps_milli_tx(tx, mci)?;
    fee_from_curve(store, mci, tps_milli)
}

fn fee_from_curve(store: &Store, mci: u64, tps_milli: u64) -> Result<u64, StoreError> {
    let base = store.system_numeric_at(SystemSubject::BaseTpsFee, mci)?;
    let multiplier = store.system_numeric_at(SystemSubject::TpsFeeMultiplier, mci)?;
    let interval = store
        .system_numeric_at(SystemSubject::TpsInterval, mci)?
        .max(1);
    let load = (tps_milli as u128)
        .saturating_mul(multiplier as u128)
        .saturating_mul(base as u128)
        / (1000u128 * interval as u128);
    Ok((base as u128).saturating_add(load).min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_02_object_store::{StoreConfig, UnitRow};
    use shared_types::{Sequence, UnitProps};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::for_testing(dir.path().to_string_lossy())).unwrap();
        (dir, store)
    }

    fn mc_unit(store: &Store, mci: u64, timestamp: u64) {
        let unit = format!("MC{mci}");
        let mut tx = store.begin_tx();
        tx.insert_unit(&UnitRow {
            props: UnitProps {
                unit: unit.clone(),
                level: mci,
                witnessed_level: mci,
                best_parent_unit: None,
                is_on_main_chain: true,
                main_chain_index: Some(mci),
                latest_included_mc_index: None,
                is_stable: true,
                is_free: false,
                sequence: Sequence::Good,
                timestamp,
                parent_units: vec![],
                witness_list_unit: None,
                last_ball_mci: 0,
                author_addresses: vec![],
                headers_commission: 0,
                payload_commission: 0,
                tps_fee: 0,
                actual_tps_fee: None,
            },
            unstable_message_refs: 0,
        })
        .unwrap();
        tx.set_mc_unit(mci, &unit);
        tx.commit().unwrap();
    }

    #[test]
    fn empty_history_is_zero_tps() {
        let (_dir, store) = open_store();
        assert_eq!(observed_tps_milli(&store, 5).unwrap(), 0);
    }

    #[test]
    fn throughput_reflects_unit_spacing() {
        let (_dir, store) = open_store();
        // 11 units spaced 10 seconds apart: 11 units over 100s = 110 mTPS.
        for mci in 0..=10 {
            mc_unit(&store, mci, 1000 + mci * 10);
        }
        assert_eq!(observed_tps_milli(&store, 10).unwrap(), 110);
    }

    #[test]
    fn min_fee_grows_with_load() {
        let (_dir, store) = open_store();
        let idle_fee = min_tps_fee(&store, 0).unwrap();

        // One unit per second: 21 units over 20s = 1050 mTPS.
        for mci in 0..=20 {
            mc_unit(&store, mci, 2000 + mci);
        }
        let busy_fee = min_tps_fee(&store, 20).unwrap();
        assert!(busy_fee > idle_fee, "{busy_fee} vs {idle_fee}");
    }

    #[test]
    fn min_fee_is_deterministic() {
        let (_dir, store) = open_store();
        for mci in 0..=20 {
            mc_unit(&store, mci, 3000 + mci * 3);
        }
        assert_eq!(
            min_tps_fee(&store, 20).unwrap(),
            min_tps_fee(&store, 20).unwrap()
        );
    }
}
