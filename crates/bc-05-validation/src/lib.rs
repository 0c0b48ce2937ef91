//! # Validator
//!
//! Turns a candidate joint into either an accepted unit ready for the
//! writer, a terminal rejection, or a transient outcome (missing parents,
//! last-ball race). The pipeline order is fixed:
//!
//! 1. shape checks (including size-commission equality)
//! 2. parents known
//! 3. last-ball correctness
//! 4. timestamp window
//! 5. operator-set pinning
//! 6. authors & signatures
//! 7. app-specific message checks
//! 8. double-spend search
//! 9. witnessed-level non-retreat
//! 10. TPS fee sufficiency
//!
//! The caller runs the whole pipeline under the `handle-joint` mutex and
//! releases it on every path. Resource exhaustion inside evaluation
//! (complexity, ops, depth) is a semantic rejection of the content, never
//! a panic - a panic here would unwind past the mutex and freeze intake.

pub mod authors;
pub mod double_spend;
pub mod last_ball;
pub mod messages;
pub mod shape;
pub mod state_reader;

use bc_02_object_store::Store;
use bc_03_dag::{latest_included_mc_index, pick_best_parent, witnessed_level_via_best_parent};
use bc_04_definitions::BasicFormulaEvaluator;
use bc_09_tps_fees::{check_fee_sufficiency, min_tps_fee};
use serde_json::Value;
use shared_types::{
    network_params, Address, Joint, Sequence, UnitId, UnitProps, ValidationError,
    TIMESTAMP_SKEW_TOLERANCE_SECS,
};
use tracing::{debug, instrument};

pub use double_spend::DoubleSpendInput;
pub use state_reader::StoreStateReader;

/// Tunables of the pipeline, surfaced through node configuration.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Accepted clock skew for the timestamp upper bound, seconds.
    pub skew_tolerance_secs: u64,
    /// Evaluator complexity budget.
    pub max_complexity: u32,
    /// Evaluator op budget.
    pub max_ops: u32,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            skew_tolerance_secs: TIMESTAMP_SKEW_TOLERANCE_SECS,
            max_complexity: shared_types::MAX_COMPLEXITY,
            max_ops: shared_types::MAX_OPS,
        }
    }
}

/// A validated joint with everything the writer needs to persist it.
#[derive(Debug, Clone)]
pub struct AcceptedJoint {
    /// The joint, its unit id filled in.
    pub joint: Joint,
    /// Computed graph props (sequence already resolved).
    pub props: UnitProps,
    /// Inputs that conflict with other unsettled spends; all members of
    /// each conflict set lose their serial claim together.
    pub double_spend_inputs: Vec<DoubleSpendInput>,
    /// Inline definitions to persist: (address, definition, chash).
    pub definitions: Vec<(Address, Value, Address)>,
}

/// Run the full pipeline. `now` is the receiving node's clock (unix
/// seconds); it only bounds the timestamp from above.
#[instrument(skip_all, fields(unit))]
pub fn validate(
    store: &Store,
    joint: &Joint,
    now: u64,
    options: &ValidationOptions,
) -> Result<AcceptedJoint, ValidationError> {
    let mut joint = joint.clone();

    // 1. Shape, sizes, hash integrity.
    let unit_id = shape::check_shape(&joint.unit)?;
    tracing::Span::current().record("unit", unit_id.as_str());
    joint.unit.unit = Some(unit_id.clone());
    if store.is_known_unit(&unit_id).map_err(internal)? {
        return Err(ValidationError::Joint(format!("unit {unit_id} already known")));
    }

    if joint.unit.is_genesis() {
        return validate_genesis(store, joint, unit_id, options);
    }

    // 2. Parents known.
    let mut missing: Vec<UnitId> = Vec::new();
    for parent in &joint.unit.parent_units {
        if !store.is_known_unit(parent).map_err(internal)? {
            missing.push(parent.clone());
        }
    }
    if let Some(last_ball_unit) = &joint.unit.last_ball_unit {
        if !store.is_known_unit(last_ball_unit).map_err(internal)? {
            missing.push(last_ball_unit.clone());
        }
    }
    if !missing.is_empty() {
        return Err(ValidationError::NeedParentUnits(missing));
    }

    // 3. Last ball correctness.
    let last_ball_mci = last_ball::check_last_ball(store, &joint.unit)?;

    // 4. Timestamp window.
    let params = network_params();
    if params.timestamp_window_active(last_ball_mci) {
        check_timestamp(store, &joint.unit, now, options)?;
    }

    // 5. Operator set pinning.
    let operators = check_operator_pin(store, &joint.unit, last_ball_mci)?;

    // Graph props.
    let mut max_parent_level = 0u64;
    let mut max_parent_wl = 0u64;
    for parent in &joint.unit.parent_units {
        let p = store
            .unit_props(parent)
            .map_err(internal)?
            .ok_or_else(|| ValidationError::Internal(format!("parent {parent} vanished")))?;
        max_parent_level = max_parent_level.max(p.level);
        max_parent_wl = max_parent_wl.max(p.witnessed_level);
    }
    let best_parent = pick_best_parent(store, &joint.unit.parent_units, &operators)
        .map_err(|e| ValidationError::Internal(e.to_string()))?;
    let witnessed_level = witnessed_level_via_best_parent(store, &best_parent, &operators)
        .map_err(|e| ValidationError::Internal(e.to_string()))?;
    let limci =
        latest_included_mc_index(store, &joint.unit.parent_units).map_err(internal_dag)?;

    // 9. Witnessed level must not retreat below any parent.
    if params.wl_retreat_active(last_ball_mci) && witnessed_level < max_parent_wl {
        return Err(ValidationError::Unit(format!(
            "witnessed level {witnessed_level} retreats below parent level {max_parent_wl}"
        )));
    }

    // 6. Authors & signatures.
    let definitions = authors::check_authors(store, &joint.unit, last_ball_mci, options)?;

    // 7. Message semantics.
    messages::check_messages(store, &joint.unit, last_ball_mci)?;

    // 8. Double spends.
    let double_spend_inputs = double_spend::find_conflicts(store, &joint.unit, &unit_id)?;
    let sequence = if double_spend_inputs.is_empty() {
        Sequence::Good
    } else {
        Sequence::TempBad
    };

    // 10. TPS fee sufficiency.
    if params.tps_fees_active(last_ball_mci) {
        let required = min_tps_fee(store, last_ball_mci).map_err(internal)?;
        check_fee_sufficiency(store, &joint.unit, last_ball_mci, required).map_err(|e| {
            match e {
                bc_09_tps_fees::TpsFeeError::Store(e) => internal(e),
                other => ValidationError::Unit(other.to_string()),
            }
        })?;
    }

    let props = UnitProps {
        unit: unit_id,
        level: max_parent_level + 1,
        witnessed_level,
        best_parent_unit: Some(best_parent),
        is_on_main_chain: false,
        main_chain_index: None,
        latest_included_mc_index: limci,
        is_stable: false,
        is_free: true,
        sequence,
        timestamp: joint.unit.timestamp,
        parent_units: joint.unit.parent_units.clone(),
        witness_list_unit: joint.unit.witness_list_unit.clone(),
        last_ball_mci,
        author_addresses: joint
            .unit
            .author_addresses()
            .iter()
            .map(|s| s.to_string())
            .collect(),
        headers_commission: joint.unit.headers_commission,
        payload_commission: joint.unit.payload_commission,
        tps_fee: joint.unit.tps_fee.unwrap_or(0),
        actual_tps_fee: None,
    };
    debug!(sequence = ?props.sequence, level = props.level, "unit accepted");
    Ok(AcceptedJoint {
        joint,
        props,
        double_spend_inputs,
        definitions,
    })
}

/// Genesis short path: no parents, no last ball, inline operator list;
/// signatures and messages still fully validated.
fn validate_genesis(
    store: &Store,
    joint: Joint,
    unit_id: UnitId,
    options: &ValidationOptions,
) -> Result<AcceptedJoint, ValidationError> {
    let params = network_params();
    if unit_id != params.genesis_unit {
        return Err(ValidationError::Unit(format!(
            "parentless unit {unit_id} is not the genesis unit"
        )));
    }
    let witnesses = joint
        .unit
        .witnesses
        .as_ref()
        .ok_or_else(|| ValidationError::Unit("genesis must list operators inline".into()))?;
    shape::check_operator_list(witnesses)?;
    if *witnesses != params.genesis_operators {
        return Err(ValidationError::Unit(
            "genesis operator list differs from configured network".into(),
        ));
    }

    let definitions = authors::check_authors(store, &joint.unit, 0, options)?;
    messages::check_messages(store, &joint.unit, 0)?;

    let props = UnitProps {
        unit: unit_id,
        level: 0,
        witnessed_level: 0,
        best_parent_unit: None,
        is_on_main_chain: false,
        main_chain_index: None,
        latest_included_mc_index: None,
        is_stable: false,
        is_free: true,
        sequence: Sequence::Good,
        timestamp: joint.unit.timestamp,
        parent_units: vec![],
        witness_list_unit: None,
        last_ball_mci: 0,
        author_addresses: joint
            .unit
            .author_addresses()
            .iter()
            .map(|s| s.to_string())
            .collect(),
        headers_commission: joint.unit.headers_commission,
        payload_commission: joint.unit.payload_commission,
        tps_fee: joint.unit.tps_fee.unwrap_or(0),
        actual_tps_fee: None,
    };
    Ok(AcceptedJoint {
        joint,
        props,
        double_spend_inputs: vec![],
        definitions,
    })
}

/// Post-upgrade timestamp rule: within `[max(parent timestamps), now +
/// skew]`.
fn check_timestamp(
    store: &Store,
    unit: &shared_types::Unit,
    now: u64,
    options: &ValidationOptions,
) -> Result<(), ValidationError> {
    let mut min_allowed = 0u64;
    for parent in &unit.parent_units {
        if let Some(p) = store.unit_props(parent).map_err(internal)? {
            min_allowed = min_allowed.max(p.timestamp);
        }
    }
    if unit.timestamp < min_allowed {
        return Err(ValidationError::Unit(format!(
            "timestamp {} is before parent timestamp {min_allowed}",
            unit.timestamp
        )));
    }
    let max_allowed = now + options.skew_tolerance_secs;
    if unit.timestamp > max_allowed {
        return Err(ValidationError::Unit(format!(
            "timestamp {} is too far in the future (limit {max_allowed})",
            unit.timestamp
        )));
    }
    Ok(())
}

/// The unit's `witness_list_unit` must pin exactly the operator set the
/// governing snapshot derives at its last-ball MCI.
fn check_operator_pin(
    store: &Store,
    unit: &shared_types::Unit,
    last_ball_mci: u64,
) -> Result<Vec<Address>, ValidationError> {
    if unit.witnesses.is_some() {
        return Err(ValidationError::Unit(
            "only the genesis unit may carry an inline operator list".into(),
        ));
    }
    let governing = store.op_list_at(last_ball_mci).map_err(internal)?;
    let wlu = unit
        .witness_list_unit
        .as_ref()
        .ok_or_else(|| ValidationError::Unit("missing witness_list_unit".into()))?;
    let pinned_joint = store
        .joint(wlu)
        .map_err(internal)?
        .ok_or_else(|| ValidationError::NeedParentUnits(vec![wlu.clone()]))?;
    let pinned = pinned_joint
        .unit
        .witnesses
        .ok_or_else(|| ValidationError::Unit(format!("{wlu} carries no operator list")))?;
    if pinned != governing {
        return Err(ValidationError::Unit(
            "pinned operator set differs from the governing set".into(),
        ));
    }
    Ok(governing)
}

pub(crate) fn internal(e: impl std::fmt::Display) -> ValidationError {
    ValidationError::Internal(e.to_string())
}

pub(crate) fn internal_dag(e: bc_03_dag::DagError) -> ValidationError {
    ValidationError::Internal(e.to_string())
}

/// The formula evaluator wired into author checks. Deterministic by
/// construction; swap point for a richer engine.
pub(crate) fn formula_evaluator() -> BasicFormulaEvaluator {
    BasicFormulaEvaluator
}
