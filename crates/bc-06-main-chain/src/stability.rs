//! # Stability Determination
//!
//! A main-chain unit becomes stable when the DAG can no longer order
//! around it: every best-parent chain from every free tip crosses it, and
//! a majority of the governing operator set has witnessed above its level
//! along the chain from the best tip. Both conditions are monotone - new
//! units can only add crossings and witnesses - which is what makes
//! `last_stable_mci` irreversible.

use crate::advance::{best_free_unit, free_units_tx, mc_unit_tx, props_tx};
use crate::errors::McError;
use bc_02_object_store::{Store, StoreTx};
use bc_03_dag::determine_if_stable_in_later_units;
use shared_types::{UnitId, UnitProps, MAJORITY_OF_OPERATORS};
use std::collections::HashSet;
use tracing::trace;

/// The next MCI that is ready to stabilize, if any. Reads main-chain
/// assignments through `tx` (they may have been staged by the advance in
/// the same transaction), but walks ancestry on committed immutable
/// fields.
pub fn next_stable_candidate(
    store: &Store,
    tx: &StoreTx<'_>,
) -> Result<Option<(u64, UnitId)>, McError> {
    // The committed counter lags MCIs stabilized earlier in this same
    // transaction; walk forward to the first not-yet-stable index. Before
    // genesis stabilizes the candidate is index 0 itself.
    let mut candidate_mci = store.last_stable_mci();
    loop {
        match mc_unit_tx(tx, candidate_mci)? {
            Some(unit) if props_tx(tx, &unit)?.is_stable => candidate_mci += 1,
            _ => break,
        }
    }
    let Some(candidate) = mc_unit_tx(tx, candidate_mci)? else {
        return Ok(None);
    };
    let candidate_props = props_tx(tx, &candidate)?;

    // Genesis is stable by definition: it IS the anchor every later unit
    // references, and no alternative ordering below it can exist.
    if candidate_props.level == 0 {
        trace!(unit = %candidate, "genesis stabilizes unconditionally");
        return Ok(Some((candidate_mci, candidate)));
    }

    let free = free_units_tx(tx)?;
    let later: Vec<UnitId> = free.iter().filter(|u| **u != candidate).cloned().collect();
    if later.is_empty() {
        return Ok(None);
    }
    if !determine_if_stable_in_later_units(store, &candidate, &later)? {
        return Ok(None);
    }

    let tip = best_free_unit(tx, &free)?;
    if !operator_majority_above(store, tx, &tip, &candidate_props)? {
        return Ok(None);
    }
    trace!(mci = candidate_mci, unit = %candidate, "stability reached");
    Ok(Some((candidate_mci, candidate)))
}

/// Whether `earlier` is stable from the viewpoint anchored at `later`:
/// every best-parent chain from those units funnels through it. The
/// validator re-runs this when a unit's last ball is stable on this node
/// but the parents' ancestry walk does not cover it - around an advance
/// the inclusion cut-offs can prune a path the best-parent chains still
/// prove, and the unit merely raced this node's own stabilization.
pub fn stable_in_view_of(
    store: &Store,
    earlier: &str,
    later: &[UnitId],
) -> Result<bool, McError> {
    Ok(determine_if_stable_in_later_units(store, earlier, later)?)
}

/// Whether a majority of the operator set governing the candidate has
/// authored units strictly above its level on the best-parent chain from
/// `tip` down to the candidate.
fn operator_majority_above(
    store: &Store,
    tx: &StoreTx<'_>,
    tip: &UnitId,
    candidate: &UnitProps,
) -> Result<bool, McError> {
    let operators = operator_set_of(store, candidate)?;
    let mut collected: HashSet<String> = HashSet::new();
    let mut cursor = tip.clone();
    loop {
        if cursor == candidate.unit {
            break;
        }
        let props = props_tx(tx, &cursor)?;
        if props.level <= candidate.level {
            break;
        }
        for author in &props.author_addresses {
            if operators.contains(author) {
                collected.insert(author.clone());
            }
        }
        match props.best_parent_unit {
            Some(parent) => cursor = parent,
            None => break,
        }
    }
    Ok(collected.len() >= MAJORITY_OF_OPERATORS)
}

/// The operator set governing `unit`. The witness-list pin was checked
/// against the governed snapshot at validation time, so the governed set
/// at the unit's last-ball MCI is authoritative here.
fn operator_set_of(store: &Store, unit: &UnitProps) -> Result<HashSet<String>, McError> {
    Ok(store.op_list_at(unit.last_ball_mci)?.into_iter().collect())
}
