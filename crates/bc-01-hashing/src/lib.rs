//! # Hashing & Canonical Encoding
//!
//! Deterministic serialization and the content-addressed identifiers built
//! on it: unit ids, ball ids, content hashes and checksummed addresses.
//!
//! ## Determinism
//!
//! `canonical_bytes` is byte-stable across runs and platforms: map keys
//! are sorted, numbers use their shortest decimal form, and recursion is
//! bounded by an explicit depth budget so pathological nesting surfaces as
//! a structured error instead of stack exhaustion.

pub mod address;
pub mod canonical;
pub mod errors;
pub mod unit_hash;

pub use address::{address_from_definition, is_valid_address};
pub use canonical::{canonical_bytes, canonical_bytes_bounded, canonical_hash_b64};
pub use errors::CanonicalError;
pub use unit_hash::{
    ball_id, header_size, payload_hash_b64, payload_size, unit_content_hash, unit_digest, unit_id,
};

use sha2::{Digest, Sha256};

/// Base64 SHA-256 of arbitrary bytes: the id form used throughout.
pub fn sha256_b64(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_b64_is_44_chars() {
        assert_eq!(sha256_b64(b"").len(), 44);
        assert_eq!(
            sha256_b64(b"hello"),
            "LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ="
        );
    }
}
