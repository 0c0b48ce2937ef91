//! # Message Semantics
//!
//! App-specific checks: payment conservation, input existence and
//! ownership, issue rules, AA deployment hashes, asset flag consistency.
//! Everything here reads stable state at the unit's last-ball MCI.

use crate::internal;
use bc_01_hashing::address_from_definition;
use bc_02_object_store::Store;
use bc_03_dag::determine_if_included_or_equal;
use bc_09_tps_fees::normalize_recipients;
use shared_types::{
    Input, MessageBody, PaymentPayload, Sequence, Unit, ValidationError, TOTAL_BASE_SUPPLY,
};

/// Commission-collection inputs may cover at most this many MCIs.
const MAX_COMMISSION_RANGE: u64 = 100;

/// Validate every message of the unit.
pub fn check_messages(store: &Store, unit: &Unit, last_ball_mci: u64) -> Result<(), ValidationError> {
    let mut base_payments = 0usize;
    for (index, message) in unit.messages.iter().enumerate() {
        match &message.body {
            MessageBody::Payment(payment) => {
                if payment.asset.is_none() {
                    base_payments += 1;
                    if base_payments > 1 {
                        return Err(ValidationError::Unit(
                            "more than one base-asset payment".into(),
                        ));
                    }
                }
                check_payment(store, unit, index, payment, last_ball_mci)?;
            }
            MessageBody::Definition(aa) => {
                let derived = address_from_definition(&aa.definition);
                if derived != aa.address {
                    return Err(ValidationError::Unit(format!(
                        "message {index}: AA address {} does not match definition hash {derived}",
                        aa.address
                    )));
                }
                let base_aa = aa
                    .definition
                    .get(1)
                    .and_then(|v| v.get("base_aa"))
                    .and_then(|v| v.as_str());
                if let Some(base_aa) = base_aa {
                    if store.aa_row(base_aa).map_err(internal)?.is_none() {
                        return Err(ValidationError::Unit(format!(
                            "message {index}: base AA {base_aa} is not deployed"
                        )));
                    }
                }
            }
            MessageBody::Asset(asset) => {
                if asset.fixed_denominations
                    && asset.denominations.as_ref().map_or(true, Vec::is_empty)
                {
                    return Err(ValidationError::Unit(format!(
                        "message {index}: fixed-denomination asset without denominations"
                    )));
                }
                if asset.spender_attested
                    && asset.attestors.as_ref().map_or(true, Vec::is_empty)
                {
                    return Err(ValidationError::Unit(format!(
                        "message {index}: spender_attested asset without attestors"
                    )));
                }
            }
            _ => {}
        }
    }
    // Recipient share normalization must succeed for any unit that can be
    // fee-settled.
    normalize_recipients(unit).map_err(|e| ValidationError::Unit(e.to_string()))?;
    Ok(())
}

fn check_payment(
    store: &Store,
    unit: &Unit,
    index: usize,
    payment: &PaymentPayload,
    last_ball_mci: u64,
) -> Result<(), ValidationError> {
    let is_base = payment.asset.is_none();
    if let Some(asset_unit) = &payment.asset {
        let asset = store
            .asset(asset_unit)
            .map_err(internal)?
            .ok_or_else(|| {
                ValidationError::Unit(format!("message {index}: unknown asset {asset_unit}"))
            })?;
        if asset.mci.is_none() || asset.mci.is_some_and(|m| m > last_ball_mci) {
            return Err(ValidationError::Unit(format!(
                "message {index}: asset {asset_unit} is not stable at the last ball"
            )));
        }
    }

    let mut total_in: u64 = 0;
    for (input_index, input) in payment.inputs.iter().enumerate() {
        let amount = match input {
            Input::Transfer {
                unit: src_unit,
                message_index,
                output_index,
            } => check_transfer_input(
                store,
                unit,
                index,
                input_index,
                payment,
                src_unit,
                *message_index,
                *output_index,
            )?,
            Input::Issue {
                amount,
                serial_number,
                address,
            } => check_issue_input(
                store,
                unit,
                index,
                payment,
                *amount,
                *serial_number,
                address.as_deref(),
                last_ball_mci,
            )?,
            Input::HeadersCommission {
                from_main_chain_index,
                to_main_chain_index,
            } => check_commission_range(
                index,
                *from_main_chain_index,
                *to_main_chain_index,
                last_ball_mci,
            )
            .and_then(|()| {
                headers_commission_earned(
                    store,
                    unit,
                    *from_main_chain_index,
                    *to_main_chain_index,
                )
            })?,
            Input::Witnessing {
                from_main_chain_index,
                to_main_chain_index,
            } => check_commission_range(
                index,
                *from_main_chain_index,
                *to_main_chain_index,
                last_ball_mci,
            )
            .and_then(|()| {
                witnessing_earned(store, unit, *from_main_chain_index, *to_main_chain_index)
            })?,
        };
        total_in = total_in
            .checked_add(amount)
            .ok_or_else(|| ValidationError::Unit("input sum overflows".into()))?;
    }

    let total_out = payment
        .total_output()
        .ok_or_else(|| ValidationError::Unit("output sum overflows".into()))?;
    let required = if is_base {
        total_out
            .checked_add(unit.total_commissions())
            .ok_or_else(|| ValidationError::Unit("output+fee sum overflows".into()))?
    } else {
        total_out
    };
    if total_in != required {
        return Err(ValidationError::Unit(format!(
            "message {index}: inputs {total_in} do not balance outputs+fees {required}"
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn check_transfer_input(
    store: &Store,
    unit: &Unit,
    message_index: usize,
    input_index: usize,
    payment: &PaymentPayload,
    src_unit: &str,
    src_msg: u32,
    src_out: u32,
) -> Result<u64, ValidationError> {
    let at = format!("message {message_index} input {input_index}");
    let src_props = store
        .unit_props(src_unit)
        .map_err(internal)?
        .ok_or_else(|| ValidationError::Unit(format!("{at}: unknown source unit {src_unit}")))?;
    if src_props.is_stable && src_props.sequence == Sequence::FinalBad {
        return Err(ValidationError::Unit(format!(
            "{at}: source unit {src_unit} is final-bad"
        )));
    }
    // The source must be visible from this unit's position in the DAG.
    if !determine_if_included_or_equal(store, src_unit, &unit.parent_units)
        .map_err(|e| ValidationError::Internal(e.to_string()))?
    {
        return Err(ValidationError::Unit(format!(
            "{at}: source unit {src_unit} is not in the ancestry"
        )));
    }
    let output = store
        .output(src_unit, src_msg, src_out)
        .map_err(internal)?
        .ok_or_else(|| {
            ValidationError::Unit(format!("{at}: no output {src_unit}:{src_msg}:{src_out}"))
        })?;
    if output.is_spent {
        return Err(ValidationError::Unit(format!(
            "{at}: output already spent at a stable point"
        )));
    }
    if output.asset.as_deref() != payment.asset.as_deref() {
        return Err(ValidationError::Unit(format!("{at}: asset mismatch")));
    }
    if payment.denomination.is_some() && output.denomination != payment.denomination {
        return Err(ValidationError::Unit(format!("{at}: denomination mismatch")));
    }
    if !unit.is_authored_by(&output.address) {
        return Err(ValidationError::Unit(format!(
            "{at}: output owner {} is not an author",
            output.address
        )));
    }
    Ok(output.amount)
}

#[allow(clippy::too_many_arguments)]
fn check_issue_input(
    store: &Store,
    unit: &Unit,
    message_index: usize,
    payment: &PaymentPayload,
    amount: u64,
    serial_number: u64,
    address: Option<&str>,
    last_ball_mci: u64,
) -> Result<u64, ValidationError> {
    let at = format!("message {message_index} issue");
    if amount == 0 {
        return Err(ValidationError::Unit(format!("{at}: zero amount")));
    }
    let issuer = address
        .or_else(|| unit.first_author_address())
        .unwrap_or_default();
    if !unit.is_authored_by(issuer) {
        return Err(ValidationError::Unit(format!(
            "{at}: issuer {issuer} is not an author"
        )));
    }
    match &payment.asset {
        None => {
            // The base asset is created once, in full, by genesis.
            if !unit.is_genesis() {
                return Err(ValidationError::Unit(format!(
                    "{at}: base asset can only be issued at genesis"
                )));
            }
            if serial_number != 1 || amount != TOTAL_BASE_SUPPLY {
                return Err(ValidationError::Unit(format!(
                    "{at}: genesis must issue the full supply with serial 1"
                )));
            }
            Ok(amount)
        }
        Some(asset_unit) => {
            let asset = store
                .asset(asset_unit)
                .map_err(internal)?
                .ok_or_else(|| {
                    ValidationError::Unit(format!("{at}: unknown asset {asset_unit}"))
                })?;
            let payload: shared_types::AssetPayload = serde_json::from_str(&asset.payload_json)
                .map_err(|e| ValidationError::Internal(e.to_string()))?;
            if payload.issued_by_definer_only && issuer != asset.definer {
                return Err(ValidationError::Unit(format!(
                    "{at}: asset is issued by definer only"
                )));
            }
            if let Some(cap) = payload.cap {
                if serial_number != 1 {
                    return Err(ValidationError::Unit(format!(
                        "{at}: capped assets issue once (serial 1)"
                    )));
                }
                if amount > cap {
                    return Err(ValidationError::Unit(format!(
                        "{at}: issue {amount} exceeds cap {cap}"
                    )));
                }
            }
            let _ = last_ball_mci;
            Ok(amount)
        }
    }
}

fn check_commission_range(
    message_index: usize,
    from: u64,
    to: u64,
    last_ball_mci: u64,
) -> Result<(), ValidationError> {
    if from > to {
        return Err(ValidationError::Unit(format!(
            "message {message_index}: inverted commission range"
        )));
    }
    if to >= last_ball_mci && last_ball_mci > 0 {
        return Err(ValidationError::Unit(format!(
            "message {message_index}: commission range must end before the last ball"
        )));
    }
    if to - from >= MAX_COMMISSION_RANGE {
        return Err(ValidationError::Unit(format!(
            "message {message_index}: commission range wider than {MAX_COMMISSION_RANGE}"
        )));
    }
    Ok(())
}

/// Headers commissions earned by this unit's authors over the range: the
/// share-weighted headers commissions of stable units whose recipient
/// list names an author.
fn headers_commission_earned(
    store: &Store,
    unit: &Unit,
    from: u64,
    to: u64,
) -> Result<u64, ValidationError> {
    let mut earned: u64 = 0;
    for mci in from..=to {
        for stable_unit in store.stable_units_at(mci).map_err(internal)? {
            let Some(joint) = store.joint(&stable_unit).map_err(internal)? else {
                continue;
            };
            let recipients =
                normalize_recipients(&joint.unit).map_err(|e| internal(e.to_string()))?;
            for (address, share) in recipients {
                if unit.is_authored_by(&address) {
                    earned += u64::from(joint.unit.headers_commission) * u64::from(share) / 100;
                }
            }
        }
    }
    Ok(earned)
}

/// Witnessing income earned over the range: payload commissions of
/// main-chain units authored by one of this unit's authors.
fn witnessing_earned(
    store: &Store,
    unit: &Unit,
    from: u64,
    to: u64,
) -> Result<u64, ValidationError> {
    let mut earned: u64 = 0;
    for mci in from..=to {
        let Some(mc_unit) = store.mc_unit_at(mci).map_err(internal)? else {
            continue;
        };
        let Some(props) = store.unit_props(&mc_unit).map_err(internal)? else {
            continue;
        };
        if props
            .author_addresses
            .iter()
            .any(|a| unit.is_authored_by(a))
        {
            earned += u64::from(props.payload_commission);
        }
    }
    Ok(earned)
}
