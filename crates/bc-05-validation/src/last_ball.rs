//! # Last-Ball Correctness
//!
//! The last ball anchors a unit to a stable snapshot: it must name a unit
//! that is stable on the main chain, carry that unit's actual ball, and
//! be inside the ancestry of EVERY parent. Two races are transient, not
//! terminal: a last ball not yet stable on this node (the chain may be
//! about to advance), and a last ball this node stabilized moments ago
//! whose coverage the ancestry cut-offs cannot yet prove - the stability
//! determination is re-run from the parents before condemning, and a
//! positive answer parks the unit for retry instead. Only a wrong ball or
//! a genuinely uncovered anchor is terminal.

use crate::internal;
use bc_02_object_store::Store;
use bc_03_dag::included_in_all;
use bc_06_main_chain::stable_in_view_of;
use shared_types::{Unit, ValidationError};
use tracing::debug;

/// Validate the last-ball reference; returns the unit's last-ball MCI.
pub fn check_last_ball(store: &Store, unit: &Unit) -> Result<u64, ValidationError> {
    let last_ball_unit = unit
        .last_ball_unit
        .as_ref()
        .ok_or_else(|| ValidationError::Joint("missing last_ball_unit".into()))?;
    let last_ball = unit
        .last_ball
        .as_ref()
        .ok_or_else(|| ValidationError::Joint("missing last_ball".into()))?;

    let props = store
        .unit_props(last_ball_unit)
        .map_err(internal)?
        .ok_or_else(|| ValidationError::NeedParentUnits(vec![last_ball_unit.clone()]))?;

    if !props.is_on_main_chain {
        return Err(ValidationError::Unit(format!(
            "last ball unit {last_ball_unit} is not on the main chain"
        )));
    }
    if !props.is_stable {
        // The unit may be anchored on an MCI this node is about to
        // stabilize; retry after the chain advances.
        return Err(ValidationError::Transient(format!(
            "last ball unit {last_ball_unit} is not yet stable here"
        )));
    }
    let mci = props.main_chain_index.ok_or_else(|| {
        ValidationError::Internal(format!("stable unit {last_ball_unit} has no mci"))
    })?;

    // The ball must be the one actually assigned at stabilization.
    let actual_ball = store
        .ball_of_unit(last_ball_unit)
        .map_err(internal)?
        .ok_or_else(|| {
            ValidationError::Internal(format!("stable unit {last_ball_unit} has no ball"))
        })?;
    if actual_ball != *last_ball {
        return Err(ValidationError::Unit(format!(
            "last ball {last_ball} does not match the ball of {last_ball_unit}"
        )));
    }

    // Stable in the ancestry of every parent.
    if !included_in_all(store, last_ball_unit, &unit.parent_units)
        .map_err(|e| ValidationError::Internal(e.to_string()))?
    {
        // The anchor is stable here yet the ancestry walk does not cover
        // it: this node's main chain may have advanced past the
        // composer's snapshot between composition and validation, with
        // the inclusion cut-offs pruning a path that exists. Re-run the
        // stability determination from the parents before condemning.
        if stable_in_view_of(store, last_ball_unit, &unit.parent_units)
            .map_err(|e| ValidationError::Internal(e.to_string()))?
        {
            debug!(%last_ball_unit, "last ball just advanced; parking for retry");
            return Err(ValidationError::Transient(
                "last ball just advanced".into(),
            ));
        }
        return Err(ValidationError::Unit(format!(
            "last ball unit {last_ball_unit} is not an ancestor of every parent"
        )));
    }
    Ok(mci)
}
