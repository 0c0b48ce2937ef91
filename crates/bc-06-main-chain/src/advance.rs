//! # Main-Chain Advance
//!
//! Recomputes the main chain after a save: walk best parents down from the
//! best free tip until the walk meets the existing chain, demote whatever
//! the old chain had above the junction, then assign indexes upward and
//! give every newly covered unit the MCI of the first main-chain unit
//! including it. A retreat can only touch unstable territory; a stable
//! main-chain unit moving is an invariant breach, not a recoverable state.

use crate::errors::McError;
use bc_02_object_store::{keys, StoreTx};
use shared_types::{UnitId, UnitProps};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Recompute the main chain inside `tx` (whose merged view covers both
/// staged and committed rows). Returns every props row the advance
/// touched, for post-commit cache synchronization.
pub fn advance_main_chain(tx: &mut StoreTx<'_>) -> Result<Vec<UnitProps>, McError> {
    let free = free_units_tx(tx)?;
    if free.is_empty() {
        return Ok(Vec::new());
    }
    let tip = best_free_unit(tx, &free)?;
    let mut touched: Vec<UnitProps> = Vec::new();

    // Walk down the best-parent links to the junction with the old chain.
    let mut new_chain_desc: Vec<UnitProps> = Vec::new();
    let mut junction: Option<UnitProps> = None;
    let mut cursor = tip.clone();
    loop {
        let props = props_tx(tx, &cursor)?;
        if props.is_on_main_chain {
            junction = Some(props);
            break;
        }
        let next = props.best_parent_unit.clone();
        new_chain_desc.push(props);
        match next {
            Some(parent) => cursor = parent,
            None => break,
        }
    }
    if new_chain_desc.is_empty() {
        // The tip already is the chain head; nothing moved.
        return Ok(Vec::new());
    }

    let start_mci = junction
        .as_ref()
        .and_then(|p| p.main_chain_index)
        .map(|m| m + 1)
        .unwrap_or(0);

    // Demote the old chain above the junction.
    let mut demote_mci = start_mci;
    while let Some(old_unit) = mc_unit_tx(tx, demote_mci)? {
        let mut props = props_tx(tx, &old_unit)?;
        if props.is_stable {
            return Err(McError::Inconsistent(format!(
                "stable main-chain unit {old_unit} at mci {demote_mci} would retreat"
            )));
        }
        trace!(unit = %old_unit, mci = demote_mci, "demoting from main chain");
        props.is_on_main_chain = false;
        props.main_chain_index = None;
        tx.update_props(&props)?;
        tx.clear_mc_unit(demote_mci);
        touched.push(props);
        demote_mci += 1;
    }

    // Clear the MCI of every unstable unit assigned above the junction;
    // they are re-covered below from the new chain.
    for unit in unstable_units_tx(tx)? {
        let mut props = props_tx(tx, &unit)?;
        if !props.is_on_main_chain
            && props.main_chain_index.is_some_and(|m| m >= start_mci)
        {
            props.main_chain_index = None;
            tx.update_props(&props)?;
            touched.push(props);
        }
    }

    // Assign the new chain bottom-up and cover ancestors.
    for (offset, chain_props) in new_chain_desc.iter().rev().enumerate() {
        let mci = start_mci + offset as u64;
        let mut props = props_tx(tx, &chain_props.unit)?;
        props.is_on_main_chain = true;
        props.main_chain_index = Some(mci);
        tx.update_props(&props)?;
        tx.set_mc_unit(mci, &props.unit);
        debug!(unit = %props.unit, mci, "main chain advanced");
        cover_ancestors(tx, &props, mci, &mut touched)?;
        touched.push(props);
    }

    Ok(touched)
}

/// Give every ancestor of a new main-chain unit that has no MCI yet the
/// MCI of this first covering main-chain unit.
fn cover_ancestors(
    tx: &mut StoreTx<'_>,
    mc_props: &UnitProps,
    mci: u64,
    touched: &mut Vec<UnitProps>,
) -> Result<(), McError> {
    let mut queue: VecDeque<UnitId> = mc_props.parent_units.iter().cloned().collect();
    while let Some(unit) = queue.pop_front() {
        let mut props = props_tx(tx, &unit)?;
        if props.main_chain_index.is_some() {
            // Covered by an earlier (or this) main-chain unit already;
            // everything below it is covered too.
            continue;
        }
        props.main_chain_index = Some(mci);
        tx.update_props(&props)?;
        queue.extend(props.parent_units.iter().cloned());
        touched.push(props);
    }
    Ok(())
}

/// The free unit with the best (witnessed level, level, id) rank.
pub(crate) fn best_free_unit(tx: &StoreTx<'_>, free: &[UnitId]) -> Result<UnitId, McError> {
    let mut best: Option<UnitProps> = None;
    for unit in free {
        let props = props_tx(tx, unit)?;
        let replace = match &best {
            None => true,
            Some(current) => props.best_parent_rank() > current.best_parent_rank(),
        };
        if replace {
            best = Some(props);
        }
    }
    best.map(|p| p.unit)
        .ok_or_else(|| McError::Inconsistent("no free units".into()))
}

pub(crate) fn props_tx(tx: &StoreTx<'_>, unit: &str) -> Result<UnitProps, McError> {
    tx.unit_props(unit)?
        .ok_or_else(|| McError::Inconsistent(format!("missing props for {unit}")))
}

pub(crate) fn mc_unit_tx(tx: &StoreTx<'_>, mci: u64) -> Result<Option<UnitId>, McError> {
    Ok(tx
        .get_raw(&keys::mc_unit(mci))?
        .map(|b| String::from_utf8_lossy(&b).into_owned()))
}

pub(crate) fn free_units_tx(tx: &StoreTx<'_>) -> Result<Vec<UnitId>, McError> {
    Ok(tx
        .scan(&keys::scan_prefix("free", &[]), 100_000)?
        .into_iter()
        .map(|(key, _)| keys::last_part(&key))
        .collect())
}

pub(crate) fn unstable_units_tx(tx: &StoreTx<'_>) -> Result<Vec<UnitId>, McError> {
    Ok(tx
        .scan(&keys::scan_prefix("unst", &[]), 100_000)?
        .into_iter()
        .map(|(key, _)| keys::last_part(&key))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_02_object_store::{Store, StoreConfig, UnitRow};
    use shared_types::Sequence;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::for_testing(dir.path().to_string_lossy())).unwrap();
        (dir, store)
    }

    fn props(unit: &str, level: u64, wl: u64, parents: Vec<UnitId>) -> UnitProps {
        UnitProps {
            unit: unit.into(),
            level,
            witnessed_level: wl,
            best_parent_unit: parents.first().cloned(),
            is_on_main_chain: false,
            main_chain_index: None,
            latest_included_mc_index: None,
            is_stable: false,
            is_free: true,
            sequence: Sequence::Good,
            timestamp: level,
            parent_units: parents,
            witness_list_unit: None,
            last_ball_mci: 0,
            author_addresses: vec![],
            headers_commission: 0,
            payload_commission: 0,
            tps_fee: 0,
            actual_tps_fee: None,
        }
    }

    fn save(store: &Store, p: UnitProps) {
        let mut tx = store.begin_tx();
        tx.insert_unit(&UnitRow {
            props: p,
            unstable_message_refs: 0,
        })
        .unwrap();
        tx.commit().unwrap();
    }

    fn advance(store: &Store) {
        let mut tx = store.begin_tx();
        advance_main_chain(&mut tx).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn genesis_becomes_mci_zero() {
        let (_dir, store) = open_store();
        save(&store, props("GENESIS", 0, 0, vec![]));
        advance(&store);
        assert_eq!(store.mc_unit_at(0).unwrap(), Some("GENESIS".to_string()));
        let p = store.unit_props("GENESIS").unwrap().unwrap();
        assert!(p.is_on_main_chain);
        assert_eq!(p.main_chain_index, Some(0));
    }

    #[test]
    fn chain_extends_and_covers_side_units() {
        let (_dir, store) = open_store();
        save(&store, props("GENESIS", 0, 0, vec![]));
        advance(&store);
        save(&store, props("A", 1, 1, vec!["GENESIS".into()]));
        // SIDE is a parent of B but not on the best-parent chain.
        save(&store, props("SIDE", 1, 0, vec!["GENESIS".into()]));
        save(&store, props("B", 2, 2, vec!["A".into(), "SIDE".into()]));
        advance(&store);

        assert_eq!(store.mc_unit_at(1).unwrap(), Some("A".to_string()));
        assert_eq!(store.mc_unit_at(2).unwrap(), Some("B".to_string()));
        // SIDE gets the MCI of B, the first MC unit covering it.
        let side = store.unit_props("SIDE").unwrap().unwrap();
        assert!(!side.is_on_main_chain);
        assert_eq!(side.main_chain_index, Some(2));
    }

    #[test]
    fn tip_retreats_to_common_ancestor() {
        let (_dir, store) = open_store();
        save(&store, props("GENESIS", 0, 0, vec![]));
        advance(&store);
        save(&store, props("A", 1, 1, vec!["GENESIS".into()]));
        advance(&store);
        assert_eq!(store.mc_unit_at(1).unwrap(), Some("A".to_string()));

        // A better-witnessed fork arrives off GENESIS.
        save(&store, props("B", 1, 5, vec!["GENESIS".into()]));
        advance(&store);
        assert_eq!(store.mc_unit_at(1).unwrap(), Some("B".to_string()));
        let a = store.unit_props("A").unwrap().unwrap();
        assert!(!a.is_on_main_chain);
        assert_eq!(a.main_chain_index, None);
    }

    #[test]
    fn stable_retreat_is_an_error() {
        let (_dir, store) = open_store();
        save(&store, props("GENESIS", 0, 0, vec![]));
        advance(&store);
        // Force-stabilize genesis, then try to retreat over it.
        let mut tx = store.begin_tx();
        let mut genesis = tx.unit_props("GENESIS").unwrap().unwrap();
        genesis.is_stable = true;
        tx.mark_stable(&genesis).unwrap();
        tx.commit().unwrap();

        save(&store, props("A", 1, 1, vec!["GENESIS".into()]));
        advance(&store); // A at mci 1, fine.

        let mut tx = store.begin_tx();
        let mut a = tx.unit_props("A").unwrap().unwrap();
        a.is_stable = true;
        tx.mark_stable(&a).unwrap();
        tx.commit().unwrap();

        save(&store, props("B", 1, 9, vec!["GENESIS".into()]));
        let mut tx = store.begin_tx();
        let err = advance_main_chain(&mut tx).unwrap_err();
        assert!(matches!(err, McError::Inconsistent(_)));
    }
}
