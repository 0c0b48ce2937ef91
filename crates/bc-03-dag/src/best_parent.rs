//! # Best Parent & Witnessed Level
//!
//! The best parent of a unit is the parent with the highest witnessed
//! level, tiebroken by lower level, then by lexicographically smaller
//! unit id. Best-parent links form the skeleton the main chain follows.
//!
//! The witnessed level of a unit is the level at which its best-parent
//! chain accumulates authorship by a majority of the governing operator
//! set.

use crate::errors::DagError;
use crate::props::read_unit_props;
use bc_02_object_store::Store;
use shared_types::{Address, UnitId, MAJORITY_OF_OPERATORS};
use std::collections::HashSet;
use tracing::trace;

/// Select the best parent among `parents`.
pub fn pick_best_parent(
    store: &Store,
    parents: &[UnitId],
    _operator_set: &[Address],
) -> Result<UnitId, DagError> {
    debug_assert!(!parents.is_empty());
    let mut best: Option<(shared_types::UnitProps, UnitId)> = None;
    for parent in parents {
        let props = read_unit_props(store, parent)?;
        let replace = match &best {
            None => true,
            Some((current, _)) => props.best_parent_rank() > current.best_parent_rank(),
        };
        if replace {
            best = Some((props, parent.clone()));
        }
    }
    let (_, unit) = best.expect("non-empty parents");
    Ok(unit)
}

/// Witnessed level reached by walking the best-parent chain starting at
/// `best_parent`, accumulating distinct operator authors until a majority
/// is assembled. Falls back to level 0 (genesis) when the chain ends
/// short of a majority.
pub fn witnessed_level_via_best_parent(
    store: &Store,
    best_parent: &UnitId,
    operator_set: &[Address],
) -> Result<u64, DagError> {
    let mut collected: HashSet<&str> = HashSet::new();
    let mut current = best_parent.clone();
    loop {
        let props = read_unit_props(store, &current)?;
        for author in &props.author_addresses {
            if let Some(op) = operator_set.iter().find(|op| *op == author) {
                collected.insert(op.as_str());
            }
        }
        if collected.len() >= MAJORITY_OF_OPERATORS {
            trace!(unit = %current, level = props.level, "operator majority assembled");
            return Ok(props.level);
        }
        match props.best_parent_unit {
            Some(parent) => current = parent,
            None => return Ok(0),
        }
    }
}
