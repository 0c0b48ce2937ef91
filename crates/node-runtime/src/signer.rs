//! Local signing keys.

use base64::Engine;
use ed25519_dalek::{Signer as _, SigningKey};
use serde_json::{json, Value};
use shared_types::Address;

/// An Ed25519 key with its single-sig address definition.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Signer from 32 secret bytes.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(secret),
        }
    }

    /// Base64 public key, as it appears inside `sig` definitions.
    pub fn pubkey_b64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.key.verifying_key().to_bytes())
    }

    /// The single-sig definition owned by this key.
    pub fn definition(&self) -> Value {
        json!(["sig", { "pubkey": self.pubkey_b64() }])
    }

    /// The address of that definition.
    pub fn address(&self) -> Address {
        bc_01_hashing::address_from_definition(&self.definition())
    }

    /// Sign a 32-byte unit digest; returns the base64 authentifier.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> String {
        let signature = self.key.sign(digest);
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
    }

    /// A placeholder authentifier of the same length as a real signature,
    /// used while sizing a unit before signing (commissions include
    /// authentifier bytes, and Ed25519 signatures have a fixed encoding
    /// length).
    pub fn placeholder_authentifier() -> String {
        "A".repeat(88)
    }
}
