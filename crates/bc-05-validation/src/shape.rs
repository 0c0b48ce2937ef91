//! # Shape Checks
//!
//! Structural validation: field presence, ordering, caps, and the
//! size-commission and hash equalities. Everything here is terminal - a
//! joint that fails shape can never become valid.

use bc_01_hashing::{header_size, is_valid_address, payload_hash_b64, payload_size, unit_id};
use shared_types::{
    Address, MessageBody, PayloadLocation, Unit, UnitId, ValidationError, ALT,
    COUNT_OPERATORS, MAX_AUTHORS_PER_UNIT, MAX_DATA_FEED_NAME_LENGTH,
    MAX_DATA_FEED_VALUE_LENGTH, MAX_MESSAGES_PER_UNIT, MAX_PARENTS_PER_UNIT, MAX_UNIT_LENGTH,
};

/// Validate structure and return the computed unit id.
pub fn check_shape(unit: &Unit) -> Result<UnitId, ValidationError> {
    if unit.version_major() == 0 {
        return Err(bad(format!("unsupported version {:?}", unit.version)));
    }
    if unit.alt != ALT {
        return Err(bad(format!("wrong network alt {:?}", unit.alt)));
    }
    if unit.timestamp == 0 {
        return Err(bad("missing timestamp".into()));
    }

    check_parents(unit)?;
    check_authors_shape(unit)?;
    check_messages_shape(unit)?;
    check_size_commissions(unit)?;

    // Total serialized size cap, before anything heavier runs.
    let serialized = serde_json::to_vec(unit).map_err(|e| bad(e.to_string()))?;
    if serialized.len() > MAX_UNIT_LENGTH {
        return Err(bad(format!(
            "unit size {} exceeds cap {MAX_UNIT_LENGTH}",
            serialized.len()
        )));
    }

    // Hash integrity: a claimed id must match the recomputed one.
    let computed = unit_id(unit).map_err(|e| bad(format!("cannot hash unit: {e}")))?;
    if let Some(claimed) = &unit.unit {
        if *claimed != computed {
            return Err(bad(format!(
                "claimed unit id {claimed} does not match content hash {computed}"
            )));
        }
    }
    Ok(computed)
}

fn check_parents(unit: &Unit) -> Result<(), ValidationError> {
    if unit.is_genesis() {
        return Ok(());
    }
    if unit.parent_units.len() > MAX_PARENTS_PER_UNIT {
        return Err(bad(format!(
            "{} parents exceed the cap of {MAX_PARENTS_PER_UNIT}",
            unit.parent_units.len()
        )));
    }
    for pair in unit.parent_units.windows(2) {
        if pair[0] >= pair[1] {
            return Err(bad("parents must be sorted and unique".into()));
        }
    }
    if unit.last_ball.is_none() || unit.last_ball_unit.is_none() {
        return Err(bad("non-genesis units must reference a last ball".into()));
    }
    Ok(())
}

fn check_authors_shape(unit: &Unit) -> Result<(), ValidationError> {
    if unit.authors.is_empty() {
        return Err(bad("units must have at least one author".into()));
    }
    if unit.authors.len() > MAX_AUTHORS_PER_UNIT {
        return Err(bad(format!(
            "{} authors exceed the cap of {MAX_AUTHORS_PER_UNIT}",
            unit.authors.len()
        )));
    }
    for pair in unit.authors.windows(2) {
        if pair[0].address >= pair[1].address {
            return Err(bad("authors must be sorted by address".into()));
        }
    }
    for author in &unit.authors {
        if !is_valid_address(&author.address) {
            return Err(bad(format!("malformed address {:?}", author.address)));
        }
        if author.authentifiers.is_empty() && unit.content_hash.is_none() {
            return Err(bad(format!(
                "author {} carries no authentifiers",
                author.address
            )));
        }
    }
    Ok(())
}

fn check_messages_shape(unit: &Unit) -> Result<(), ValidationError> {
    if unit.content_hash.is_some() {
        if !unit.messages.is_empty() {
            return Err(bad("voided units must not carry messages".into()));
        }
        return Ok(());
    }
    if unit.messages.is_empty() {
        return Err(bad("units must carry at least one message".into()));
    }
    if unit.messages.len() > MAX_MESSAGES_PER_UNIT {
        return Err(bad(format!(
            "{} messages exceed the cap of {MAX_MESSAGES_PER_UNIT}",
            unit.messages.len()
        )));
    }
    for (index, message) in unit.messages.iter().enumerate() {
        // Payload hash equality for inline payloads. The canonical pass
        // carries its own depth cap, surfaced as a structured error.
        if message.payload_location == PayloadLocation::Inline {
            let payload_value = serde_json::to_value(&message.body)
                .ok()
                .and_then(|v| v.get("payload").cloned())
                .ok_or_else(|| bad(format!("message {index} has no payload")))?;
            let computed = payload_hash_b64(&payload_value, unit.uses_keyed_canonical())
                .map_err(|e| bad(format!("message {index} payload: {e}")))?;
            if computed != message.payload_hash {
                return Err(bad(format!("message {index} payload hash mismatch")));
            }
        }
        check_message_body_shape(index, &message.body)?;
    }
    Ok(())
}

fn check_message_body_shape(index: usize, body: &MessageBody) -> Result<(), ValidationError> {
    match body {
        MessageBody::Payment(payment) => {
            if payment.inputs.is_empty() {
                return Err(bad(format!("message {index}: payment without inputs")));
            }
            if payment.outputs.is_empty() {
                return Err(bad(format!("message {index}: payment without outputs")));
            }
            for output in &payment.outputs {
                if output.amount == 0 {
                    return Err(bad(format!("message {index}: zero-amount output")));
                }
                if !is_valid_address(&output.address) {
                    return Err(bad(format!(
                        "message {index}: malformed output address {:?}",
                        output.address
                    )));
                }
            }
            Ok(())
        }
        MessageBody::DataFeed(feed) => {
            if feed.is_empty() {
                return Err(bad(format!("message {index}: empty data feed")));
            }
            for (name, value) in feed {
                if name.is_empty() || name.len() > MAX_DATA_FEED_NAME_LENGTH {
                    return Err(bad(format!(
                        "message {index}: feed name length {} out of bounds",
                        name.len()
                    )));
                }
                if value.index_text().len() > MAX_DATA_FEED_VALUE_LENGTH {
                    return Err(bad(format!(
                        "message {index}: feed value too long for {name:?}"
                    )));
                }
            }
            Ok(())
        }
        MessageBody::Text(text) => {
            if text.is_empty() {
                return Err(bad(format!("message {index}: empty text")));
            }
            Ok(())
        }
        MessageBody::AddressDefinitionChange(change) => {
            if !is_valid_address(&change.definition_chash) {
                return Err(bad(format!(
                    "message {index}: malformed definition chash"
                )));
            }
            Ok(())
        }
        MessageBody::SystemVote(vote) => {
            if let shared_types::SystemVotePayload::OpList(ops) = vote {
                check_operator_list(ops)?;
            }
            Ok(())
        }
        MessageBody::Attestation(attestation) => {
            if !is_valid_address(&attestation.address) {
                return Err(bad(format!(
                    "message {index}: malformed attested address"
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// An operator list is exactly `COUNT_OPERATORS` sorted valid addresses.
pub fn check_operator_list(ops: &[Address]) -> Result<(), ValidationError> {
    if ops.len() != COUNT_OPERATORS {
        return Err(bad(format!(
            "operator list has {} members, expected {COUNT_OPERATORS}",
            ops.len()
        )));
    }
    for pair in ops.windows(2) {
        if pair[0] >= pair[1] {
            return Err(bad("operator list must be sorted and unique".into()));
        }
    }
    for op in ops {
        if !is_valid_address(op) {
            return Err(bad(format!("malformed operator address {op:?}")));
        }
    }
    Ok(())
}

/// Size-commission equality: the declared commissions must equal the
/// canonical sizes (keyed form from version 4).
fn check_size_commissions(unit: &Unit) -> Result<(), ValidationError> {
    let header = header_size(unit).map_err(|e| bad(format!("header size: {e}")))?;
    if unit.headers_commission != header {
        return Err(bad(format!(
            "headers_commission {} does not equal header size {header}",
            unit.headers_commission
        )));
    }
    let payload = payload_size(unit).map_err(|e| bad(format!("payload size: {e}")))?;
    if unit.payload_commission != payload {
        return Err(bad(format!(
            "payload_commission {} does not equal payload size {payload}",
            unit.payload_commission
        )));
    }
    Ok(())
}

fn bad(msg: String) -> ValidationError {
    ValidationError::Joint(msg)
}
