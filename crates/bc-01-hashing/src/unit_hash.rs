//! # Unit, Content and Ball Hashes
//!
//! A unit id must survive content replacement: when a unit loses a
//! double-spend tie-break its messages are replaced by their hash, yet the
//! id stays valid. The id is therefore computed over a skeleton in which
//! the content already appears as a hash:
//!
//! 1. `unit_content_hash` - canonical hash of the stripped unit (content
//!    present, authentifiers removed).
//! 2. `unit_id` - canonical hash of the header skeleton + content hash.
//!
//! Ball ids hash the unit id together with sorted parent and skiplist
//! balls, forming the ordering skeleton light clients verify.

use crate::canonical::{canonical_bytes, canonical_hash_b64};
use crate::errors::CanonicalError;
use crate::sha256_b64;
use serde_json::{json, Map, Value};
use shared_types::{BallId, Unit, UnitId};

/// Canonical hash of the stripped unit: full content, no authentifiers,
/// no claimed id. This is what replaces the messages of a final-bad unit.
pub fn unit_content_hash(unit: &Unit) -> Result<String, CanonicalError> {
    let stripped = stripped_unit_value(unit)?;
    canonical_hash_b64(&stripped, unit.uses_keyed_canonical())
}

/// SHA-256 digest of the canonical stripped unit: the 32 bytes authors
/// sign and the evaluator verifies.
pub fn unit_digest(unit: &Unit) -> Result<[u8; 32], CanonicalError> {
    use sha2::{Digest, Sha256};
    let stripped = stripped_unit_value(unit)?;
    let bytes = canonical_bytes(&stripped, unit.uses_keyed_canonical())?;
    Ok(Sha256::digest(&bytes).into())
}

/// Content-addressed unit id.
pub fn unit_id(unit: &Unit) -> Result<UnitId, CanonicalError> {
    let content_hash = match &unit.content_hash {
        // Final-bad units carry the replacement hash; recompute otherwise.
        Some(hash) => hash.clone(),
        None => unit_content_hash(unit)?,
    };
    let skeleton = hash_skeleton_value(unit, &content_hash);
    canonical_hash_b64(&skeleton, unit.uses_keyed_canonical())
}

/// Ball id of a stabilized unit: hash over the unit id and the sorted
/// parent/skiplist balls.
pub fn ball_id(unit: &UnitId, parent_balls: &[BallId], skiplist_balls: &[BallId]) -> BallId {
    let mut parents = parent_balls.to_vec();
    parents.sort();
    let mut skiplist = skiplist_balls.to_vec();
    skiplist.sort();
    let mut obj = Map::new();
    obj.insert("unit".into(), Value::String(unit.clone()));
    if !parents.is_empty() {
        obj.insert("parent_balls".into(), json!(parents));
    }
    if !skiplist.is_empty() {
        obj.insert("skiplist_balls".into(), json!(skiplist));
    }
    let value = Value::Object(obj);
    // Balls never predate version 4; keys always participate. The value is
    // flat strings, so the canonical pass cannot fail.
    let bytes = canonical_bytes(&value, true).unwrap_or_default();
    sha256_b64(&bytes)
}

/// Base64 SHA-256 of a message payload's canonical form.
pub fn payload_hash_b64(payload: &Value, with_keys: bool) -> Result<String, CanonicalError> {
    canonical_hash_b64(payload, with_keys)
}

/// Canonical byte size of the header portion: everything except messages,
/// with authentifiers included (signature bytes are paid for as headers).
pub fn header_size(unit: &Unit) -> Result<u32, CanonicalError> {
    let mut v = unit_value(unit)?;
    let obj = v.as_object_mut().expect("unit serializes to an object");
    obj.remove("unit");
    obj.remove("messages");
    obj.remove("headers_commission");
    obj.remove("payload_commission");
    obj.remove("tps_fee");
    let bytes = canonical_bytes(&v, unit.uses_keyed_canonical())?;
    Ok(bytes.len() as u32)
}

/// Canonical byte size of the payload portion (the messages array).
pub fn payload_size(unit: &Unit) -> Result<u32, CanonicalError> {
    let v = unit_value(unit)?;
    let Some(messages) = v.get("messages") else {
        return Ok(0);
    };
    let bytes = canonical_bytes(messages, unit.uses_keyed_canonical())?;
    Ok(bytes.len() as u32)
}

/// The unit as a JSON value, with serialization failures surfaced as
/// canonical errors.
fn unit_value(unit: &Unit) -> Result<Value, CanonicalError> {
    serde_json::to_value(unit).map_err(|e| CanonicalError::Serialization(e.to_string()))
}

/// The stripped unit: claimed id and authentifiers removed, content kept.
fn stripped_unit_value(unit: &Unit) -> Result<Value, CanonicalError> {
    let mut v = unit_value(unit)?;
    let obj = v.as_object_mut().expect("unit serializes to an object");
    obj.remove("unit");
    obj.remove("content_hash");
    if let Some(authors) = obj.get_mut("authors").and_then(Value::as_array_mut) {
        for author in authors {
            if let Some(a) = author.as_object_mut() {
                a.remove("authentifiers");
            }
        }
    }
    Ok(v)
}

/// The id skeleton: headers plus the content hash in place of messages.
fn hash_skeleton_value(unit: &Unit, content_hash: &str) -> Value {
    let mut obj = Map::new();
    obj.insert("version".into(), json!(unit.version));
    obj.insert("alt".into(), json!(unit.alt));
    if !unit.parent_units.is_empty() {
        obj.insert("parent_units".into(), json!(unit.parent_units));
    }
    if let Some(last_ball) = &unit.last_ball {
        obj.insert("last_ball".into(), json!(last_ball));
    }
    if let Some(last_ball_unit) = &unit.last_ball_unit {
        obj.insert("last_ball_unit".into(), json!(last_ball_unit));
    }
    if let Some(wlu) = &unit.witness_list_unit {
        obj.insert("witness_list_unit".into(), json!(wlu));
    }
    if let Some(witnesses) = &unit.witnesses {
        obj.insert("witnesses".into(), json!(witnesses));
    }
    obj.insert("timestamp".into(), json!(unit.timestamp));
    let authors: Vec<Value> = unit
        .authors
        .iter()
        .map(|a| json!({ "address": a.address }))
        .collect();
    obj.insert("authors".into(), Value::Array(authors));
    obj.insert("content_hash".into(), json!(content_hash));
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Author, Message, MessageBody, Output, PayloadLocation, PaymentPayload};
    use std::collections::BTreeMap;

    fn unit_with_sig(sig: &str) -> Unit {
        let mut authentifiers = BTreeMap::new();
        authentifiers.insert("r".to_string(), sig.to_string());
        Unit {
            version: "4.0".into(),
            alt: "1".into(),
            unit: None,
            parent_units: vec!["P1".into(), "P2".into()],
            last_ball: Some("LB".into()),
            last_ball_unit: Some("LBU".into()),
            witness_list_unit: Some("WLU".into()),
            witnesses: None,
            timestamp: 1_700_000_000,
            authors: vec![Author {
                address: "ADDR".into(),
                definition: None,
                authentifiers,
            }],
            messages: vec![Message {
                body: MessageBody::Payment(PaymentPayload {
                    asset: None,
                    denomination: None,
                    inputs: vec![],
                    outputs: vec![Output {
                        address: "ADDR".into(),
                        amount: 100,
                        blinding: None,
                        output_hash: None,
                    }],
                }),
                payload_location: PayloadLocation::Inline,
                payload_hash: "H".into(),
            }],
            earned_headers_commission_recipients: None,
            headers_commission: 0,
            payload_commission: 0,
            tps_fee: None,
            content_hash: None,
        }
    }

    #[test]
    fn unit_id_ignores_authentifiers() {
        let a = unit_with_sig("sig-one");
        let b = unit_with_sig("sig-two");
        assert_eq!(unit_id(&a).unwrap(), unit_id(&b).unwrap());
    }

    #[test]
    fn unit_id_survives_content_replacement() {
        let full = unit_with_sig("sig");
        let id_before = unit_id(&full).unwrap();

        let mut bad = full.clone();
        bad.content_hash = Some(unit_content_hash(&full).unwrap());
        bad.messages.clear();
        assert_eq!(unit_id(&bad).unwrap(), id_before);
    }

    #[test]
    fn unit_id_changes_with_content() {
        let a = unit_with_sig("sig");
        let mut b = a.clone();
        b.timestamp += 1;
        assert_ne!(unit_id(&a).unwrap(), unit_id(&b).unwrap());
    }

    #[test]
    fn ball_id_is_order_insensitive_in_parents() {
        let x = ball_id(&"U".into(), &["B2".into(), "B1".into()], &[]);
        let y = ball_id(&"U".into(), &["B1".into(), "B2".into()], &[]);
        assert_eq!(x, y);
        let z = ball_id(&"U".into(), &["B1".into()], &[]);
        assert_ne!(x, z);
    }

    #[test]
    fn sizes_are_stable_and_positive() {
        let u = unit_with_sig("sig");
        let h = header_size(&u).unwrap();
        let p = payload_size(&u).unwrap();
        assert!(h > 0);
        assert!(p > 0);
        assert_eq!(h, header_size(&u).unwrap());
    }
}
