//! # Canonical Byte Encoding
//!
//! Maps a JSON value to a deterministic byte string:
//!
//! - booleans → the literals `true` / `false`
//! - integers and finite floats → shortest decimal representation
//! - strings → their UTF-8 bytes
//! - arrays → elements joined by a single `0x00`
//! - objects → key-sorted `(key 0x00 value)` pairs joined by `0x00`;
//!   in keyless mode only the values participate (pre-v4 units)
//!
//! `null` has no canonical form and is rejected, as are non-finite floats.
//! Recursion is depth-budgeted; the budget breach is a structured error.

use crate::errors::CanonicalError;
use crate::sha256_b64;
use serde_json::Value;
use shared_types::MAX_CANONICAL_DEPTH;

const SEPARATOR: u8 = 0x00;

/// Canonical bytes of `value` with the default depth budget.
pub fn canonical_bytes(value: &Value, with_keys: bool) -> Result<Vec<u8>, CanonicalError> {
    canonical_bytes_bounded(value, with_keys, MAX_CANONICAL_DEPTH)
}

/// Canonical bytes with an explicit depth budget.
pub fn canonical_bytes_bounded(
    value: &Value,
    with_keys: bool,
    max_depth: u32,
) -> Result<Vec<u8>, CanonicalError> {
    let mut chunks = Vec::new();
    collect(value, with_keys, 0, max_depth, &mut chunks)?;
    Ok(chunks.join(&SEPARATOR))
}

/// Base64 SHA-256 of the canonical bytes.
pub fn canonical_hash_b64(value: &Value, with_keys: bool) -> Result<String, CanonicalError> {
    Ok(sha256_b64(&canonical_bytes(value, with_keys)?))
}

/// Flattens `value` into leaf chunks; the caller joins them with the
/// separator. Keeping leaves flat makes the join associative, so nesting
/// does not change byte output for equal leaf sequences with distinct
/// structure markers supplied by keys.
fn collect(
    value: &Value,
    with_keys: bool,
    depth: u32,
    max_depth: u32,
    out: &mut Vec<Vec<u8>>,
) -> Result<(), CanonicalError> {
    if depth > max_depth {
        return Err(CanonicalError::DepthExceeded { max: max_depth });
    }
    match value {
        Value::Null => Err(CanonicalError::InvalidValue("null".into())),
        Value::Bool(b) => {
            out.push(if *b { b"true".to_vec() } else { b"false".to_vec() });
            Ok(())
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push(i.to_string().into_bytes());
            } else if let Some(u) = n.as_u64() {
                out.push(u.to_string().into_bytes());
            } else if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CanonicalError::InvalidValue(format!("non-finite {f}")));
                }
                // Rust's float Display is the shortest roundtripping form.
                out.push(format!("{f}").into_bytes());
            } else {
                return Err(CanonicalError::InvalidValue("unrepresentable number".into()));
            }
            Ok(())
        }
        Value::String(s) => {
            out.push(s.as_bytes().to_vec());
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                collect(item, with_keys, depth + 1, max_depth, out)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            // serde_json::Map preserves insertion order; sort explicitly.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                if with_keys {
                    out.push(key.as_bytes().to_vec());
                }
                collect(&map[key], with_keys, depth + 1, max_depth, out)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_encode_as_literals() {
        assert_eq!(canonical_bytes(&json!(true), true).unwrap(), b"true");
        assert_eq!(canonical_bytes(&json!(42), true).unwrap(), b"42");
        assert_eq!(canonical_bytes(&json!(-7), true).unwrap(), b"-7");
        assert_eq!(canonical_bytes(&json!("abc"), true).unwrap(), b"abc");
    }

    #[test]
    fn arrays_join_with_zero_byte() {
        let got = canonical_bytes(&json!(["a", "b"]), true).unwrap();
        assert_eq!(got, b"a\0b");
    }

    #[test]
    fn object_keys_sorted_and_included() {
        let v = json!({"b": 2, "a": 1});
        assert_eq!(canonical_bytes(&v, true).unwrap(), b"a\x001\x00b\x002");
        assert_eq!(canonical_bytes(&v, false).unwrap(), b"1\x002");
    }

    #[test]
    fn null_is_rejected() {
        assert!(matches!(
            canonical_bytes(&json!({"a": null}), true),
            Err(CanonicalError::InvalidValue(_))
        ));
    }

    #[test]
    fn depth_cap_is_a_structured_error() {
        let mut v = json!("leaf");
        for _ in 0..40 {
            v = json!([v]);
        }
        assert_eq!(
            canonical_bytes_bounded(&v, true, 10),
            Err(CanonicalError::DepthExceeded { max: 10 })
        );
    }

    #[test]
    fn deep_nesting_within_cap_encodes() {
        // Depth near the default cap must not overflow the stack: the
        // encoder recurses once per level with constant frame size.
        let mut v = json!(1);
        for _ in 0..1000 {
            v = json!([v]);
        }
        assert_eq!(canonical_bytes(&v, true).unwrap(), b"1");
    }

    #[test]
    fn byte_stable_across_runs() {
        let v = json!({"unit": {"authors": [{"address": "X"}], "timestamp": 123}});
        let a = canonical_hash_b64(&v, true).unwrap();
        let b = canonical_hash_b64(&v, true).unwrap();
        assert_eq!(a, b);
    }
}
