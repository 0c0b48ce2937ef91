//! # Inclusion & Stability-In-Later-Units
//!
//! Ancestry queries bounded by two cut-offs:
//!
//! - **Level**: an ancestor's level is strictly below every descendant's;
//!   a walk never continues below the target level.
//! - **Witnessed level**: once witnessed levels are monotonic (post
//!   retreat-upgrade), a unit whose witnessed level is below the target's
//!   cannot be a descendant. The activation test uses the TARGET unit's
//!   validation-time `last_ball_mci` as persisted in its props - the same
//!   reference the validator used - not any stabilization-time index;
//!   mixing the two diverges at upgrade boundaries.

use crate::errors::DagError;
use crate::props::read_unit_props;
use bc_02_object_store::Store;
use shared_types::params::{network_params, network_params_installed};
use shared_types::{UnitId, UnitProps};
use std::collections::{HashSet, VecDeque};

/// True iff `earlier` is a DAG ancestor of at least one unit in `later`.
pub fn determine_if_included(
    store: &Store,
    earlier: &str,
    later: &[UnitId],
) -> Result<bool, DagError> {
    if later.is_empty() {
        return Ok(false);
    }
    let earlier_props = read_unit_props(store, earlier)?;
    // Genesis is an ancestor of everything else.
    if earlier_props.level == 0 {
        return Ok(true);
    }
    let wl_cutoff_active = network_params_installed()
        && network_params().wl_retreat_active(earlier_props.last_ball_mci);

    let mut queue: VecDeque<UnitId> = VecDeque::new();
    let mut seen: HashSet<UnitId> = HashSet::new();
    for unit in later {
        if unit == earlier {
            // Inclusion is strict: identity does not count.
            continue;
        }
        if seen.insert(unit.clone()) {
            queue.push_back(unit.clone());
        }
    }

    while let Some(unit) = queue.pop_front() {
        let props = read_unit_props(store, &unit)?;
        if prune(&props, &earlier_props, wl_cutoff_active) {
            continue;
        }
        // Fast path: a unit that has already included the earlier unit's
        // stable main-chain position includes the unit itself.
        if earlier_props.is_on_main_chain && earlier_props.is_stable {
            if let (Some(earlier_mci), Some(limci)) =
                (earlier_props.main_chain_index, props.latest_included_mc_index)
            {
                if limci >= earlier_mci {
                    return Ok(true);
                }
            }
        }
        for parent in &props.parent_units {
            if parent == earlier {
                return Ok(true);
            }
            if seen.insert(parent.clone()) {
                queue.push_back(parent.clone());
            }
        }
    }
    Ok(false)
}

/// Like [`determine_if_included`], with identity counting as inclusion.
pub fn determine_if_included_or_equal(
    store: &Store,
    earlier: &str,
    later: &[UnitId],
) -> Result<bool, DagError> {
    if later.iter().any(|u| u == earlier) {
        return Ok(true);
    }
    determine_if_included(store, earlier, later)
}

/// True iff `earlier` is an ancestor of EVERY unit in `later`.
pub fn included_in_all(store: &Store, earlier: &str, later: &[UnitId]) -> Result<bool, DagError> {
    for unit in later {
        if !determine_if_included_or_equal(store, earlier, std::slice::from_ref(unit))? {
            return Ok(false);
        }
    }
    Ok(!later.is_empty())
}

/// True iff every best-parent chain from every unit in `later` crosses
/// `earlier`. This is the structural core of stability: when all tips
/// funnel through a unit, no alternative ordering can bypass it.
pub fn determine_if_stable_in_later_units(
    store: &Store,
    earlier: &str,
    later: &[UnitId],
) -> Result<bool, DagError> {
    if later.is_empty() {
        return Ok(false);
    }
    let earlier_props = read_unit_props(store, earlier)?;
    for start in later {
        if !best_parent_chain_crosses(store, start, &earlier_props)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn best_parent_chain_crosses(
    store: &Store,
    start: &str,
    earlier: &UnitProps,
) -> Result<bool, DagError> {
    let mut current = start.to_string();
    loop {
        if current == earlier.unit {
            return Ok(true);
        }
        let props = read_unit_props(store, &current)?;
        if props.level < earlier.level {
            return Ok(false);
        }
        match props.best_parent_unit {
            Some(parent) => current = parent,
            // Reached genesis without crossing.
            None => return Ok(current == earlier.unit),
        }
    }
}

fn prune(props: &UnitProps, earlier: &UnitProps, wl_cutoff_active: bool) -> bool {
    if props.level < earlier.level {
        return true;
    }
    if wl_cutoff_active && props.witnessed_level < earlier.witnessed_level {
        return true;
    }
    false
}
