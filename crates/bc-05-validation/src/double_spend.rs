//! # Double-Spend Search
//!
//! For every transfer input, find all other units spending the same
//! source output. A stable good spender condemns the candidate outright.
//! Unstable spenders are conflicts: the candidate is still accepted, all
//! members of the conflict set lose their serial claims simultaneously
//! (the writer applies that in one transaction), and the tie resolves at
//! stabilization by lowest main-chain inclusion index.

use crate::internal;
use bc_02_object_store::Store;
use shared_types::{MessageBody, Sequence, Unit, UnitId, ValidationError};
use tracing::debug;

/// One conflicted input of the candidate unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoubleSpendInput {
    /// Message index inside the candidate.
    pub message_index: u32,
    /// Input index inside the message.
    pub input_index: u32,
    /// Contested source unit.
    pub src_unit: UnitId,
    /// Contested source message index.
    pub src_message_index: u32,
    /// Contested source output index.
    pub src_output_index: u32,
    /// The other spenders of the same source.
    pub conflicting_units: Vec<UnitId>,
}

/// Scan the candidate's transfer inputs for conflicts.
pub fn find_conflicts(
    store: &Store,
    unit: &Unit,
    unit_id: &UnitId,
) -> Result<Vec<DoubleSpendInput>, ValidationError> {
    let mut conflicts = Vec::new();
    for (message_index, message) in unit.messages.iter().enumerate() {
        let MessageBody::Payment(payment) = &message.body else {
            continue;
        };
        for (input_index, input) in payment.inputs.iter().enumerate() {
            let Some((src_unit, src_msg, src_out)) = input.source() else {
                continue;
            };
            let mut conflicting_units = Vec::new();
            for spender in store
                .spenders_of(src_unit, src_msg, src_out)
                .map_err(internal)?
            {
                if spender == *unit_id {
                    continue;
                }
                let props = store
                    .unit_props(&spender)
                    .map_err(internal)?
                    .ok_or_else(|| {
                        ValidationError::Internal(format!("spender {spender} has no props"))
                    })?;
                if props.is_stable && props.sequence == Sequence::Good {
                    return Err(ValidationError::Unit(format!(
                        "output {src_unit}:{src_msg}:{src_out} already spent by stable unit {spender}"
                    )));
                }
                if props.sequence != Sequence::FinalBad {
                    conflicting_units.push(spender);
                }
            }
            if !conflicting_units.is_empty() {
                debug!(
                    src = %format!("{src_unit}:{src_msg}:{src_out}"),
                    count = conflicting_units.len(),
                    "double-spend conflict recorded"
                );
                conflicts.push(DoubleSpendInput {
                    message_index: message_index as u32,
                    input_index: input_index as u32,
                    src_unit: src_unit.to_string(),
                    src_message_index: src_msg,
                    src_output_index: src_out,
                    conflicting_units,
                });
            }
        }
    }
    Ok(conflicts)
}
