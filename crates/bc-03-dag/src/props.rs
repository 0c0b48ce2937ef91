//! Unit props access for the walkers.

use crate::errors::DagError;
use bc_02_object_store::Store;
use shared_types::{UnitId, UnitProps};

/// Props of `unit`, failing on unknown ids (a saved unit's parents are
/// always saved first).
pub fn read_unit_props(store: &Store, unit: &str) -> Result<UnitProps, DagError> {
    store
        .unit_props(unit)?
        .ok_or_else(|| DagError::UnknownUnit(unit.to_string()))
}

/// The highest MCI of any main-chain unit included by `parents`: a
/// parent sitting on the main chain contributes its own MCI, any other
/// parent contributes its recorded latest-included MCI.
pub fn latest_included_mc_index(
    store: &Store,
    parents: &[UnitId],
) -> Result<Option<u64>, DagError> {
    let mut best: Option<u64> = None;
    for parent in parents {
        let props = read_unit_props(store, parent)?;
        let candidate = if props.is_on_main_chain {
            props.main_chain_index
        } else {
            props.latest_included_mc_index
        };
        if let Some(mci) = candidate {
            best = Some(best.map_or(mci, |b| b.max(mci)));
        }
    }
    Ok(best)
}
