//! # Checksummed Addresses
//!
//! An address is derived from the canonical form of its definition:
//! RIPEMD-160 over SHA-256, truncated to 128 bits of body, with a 32-bit
//! checksum interleaved at every fifth bit position. The combined 160 bits
//! encode to 32 base32 characters. Interleaving (rather than appending)
//! means a single-character typo scrambles checksum bits and is caught.

use crate::canonical::canonical_bytes;
use data_encoding::BASE32;
use ripemd::Ripemd160;
use serde_json::Value;
use sha2::{Digest, Sha256};
use shared_types::Address;

const BODY_BITS: usize = 128;
const CHECKSUM_BITS: usize = 32;
const TOTAL_BITS: usize = BODY_BITS + CHECKSUM_BITS;
/// Every fifth bit of the 160-bit result carries a checksum bit.
const CHECKSUM_STRIDE: usize = TOTAL_BITS / CHECKSUM_BITS;

/// Derive the address owned by `definition`.
///
/// Parameterized AA definitions (`{base_aa, params}`) are hashed over
/// their literal JSON text to preserve parameter fidelity; every other
/// definition is hashed over its canonical form.
pub fn address_from_definition(definition: &Value) -> Address {
    let bytes = if is_parameterized_aa(definition) {
        definition.to_string().into_bytes()
    } else {
        // Definitions are validated before hashing; a definition that
        // cannot canonicalize maps to an address nothing can own.
        canonical_bytes(definition, true).unwrap_or_default()
    };
    chash160(&bytes)
}

/// 160-bit checksummed hash, base32.
fn chash160(data: &[u8]) -> Address {
    let inner = Sha256::digest(data);
    let outer = Ripemd160::digest(inner);
    let body: Vec<bool> = bits_of(&outer[..BODY_BITS / 8]);
    let checksum_bytes = Sha256::digest(&outer[..BODY_BITS / 8]);
    let checksum: Vec<bool> = bits_of(&checksum_bytes[..CHECKSUM_BITS / 8]);
    let mixed = interleave(&body, &checksum);
    BASE32.encode(&bytes_of(&mixed))
}

/// Whether `address` is well-formed and its checksum verifies.
pub fn is_valid_address(address: &str) -> bool {
    if address.len() != 32 || address.chars().any(|c| c.is_ascii_lowercase()) {
        return false;
    }
    let Ok(decoded) = BASE32.decode(address.as_bytes()) else {
        return false;
    };
    if decoded.len() != TOTAL_BITS / 8 {
        return false;
    }
    let bits = bits_of(&decoded);
    let (body, checksum) = deinterleave(&bits);
    let body_bytes = bytes_of(&body);
    let expected = Sha256::digest(&body_bytes);
    bits_of(&expected[..CHECKSUM_BITS / 8]) == checksum
}

fn is_parameterized_aa(definition: &Value) -> bool {
    let Some(arr) = definition.as_array() else {
        return false;
    };
    arr.first().and_then(Value::as_str) == Some("autonomous agent")
        && arr
            .get(1)
            .and_then(Value::as_object)
            .is_some_and(|o| o.contains_key("base_aa"))
}

fn bits_of(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1 == 1))
        .collect()
}

fn bytes_of(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | u8::from(b)))
        .collect()
}

fn interleave(body: &[bool], checksum: &[bool]) -> Vec<bool> {
    let mut out = Vec::with_capacity(TOTAL_BITS);
    let mut body_iter = body.iter();
    let mut checksum_iter = checksum.iter();
    for pos in 0..TOTAL_BITS {
        if pos % CHECKSUM_STRIDE == 0 {
            out.push(*checksum_iter.next().expect("checksum bits exhausted"));
        } else {
            out.push(*body_iter.next().expect("body bits exhausted"));
        }
    }
    out
}

fn deinterleave(bits: &[bool]) -> (Vec<bool>, Vec<bool>) {
    let mut body = Vec::with_capacity(BODY_BITS);
    let mut checksum = Vec::with_capacity(CHECKSUM_BITS);
    for (pos, &bit) in bits.iter().enumerate() {
        if pos % CHECKSUM_STRIDE == 0 {
            checksum.push(bit);
        } else {
            body.push(bit);
        }
    }
    (body, checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derived_addresses_are_32_chars_and_valid() {
        let def = json!(["sig", {"pubkey": "AbCdEf"}]);
        let addr = address_from_definition(&def);
        assert_eq!(addr.len(), 32);
        assert!(is_valid_address(&addr));
    }

    #[test]
    fn different_definitions_different_addresses() {
        let a = address_from_definition(&json!(["sig", {"pubkey": "A"}]));
        let b = address_from_definition(&json!(["sig", {"pubkey": "B"}]));
        assert_ne!(a, b);
    }

    #[test]
    fn typo_breaks_checksum() {
        let addr = address_from_definition(&json!(["sig", {"pubkey": "A"}]));
        let mut chars: Vec<char> = addr.chars().collect();
        chars[5] = if chars[5] == 'A' { 'B' } else { 'A' };
        let corrupted: String = chars.into_iter().collect();
        assert!(!is_valid_address(&corrupted));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("short"));
        assert!(!is_valid_address(&"a".repeat(32)));
        assert!(!is_valid_address(&"!".repeat(32)));
    }

    #[test]
    fn parameterized_aa_uses_literal_text() {
        let def = json!(["autonomous agent", {"base_aa": "BASEADDRESS", "params": {"x": 1}}]);
        let addr = address_from_definition(&def);
        assert_eq!(addr.len(), 32);
        assert!(is_valid_address(&addr));
    }
}
