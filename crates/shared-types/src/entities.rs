//! # Core Domain Entities
//!
//! The unit/joint data model of the DAG ledger.
//!
//! ## Clusters
//!
//! - **DAG**: [`Unit`], [`Joint`], [`Author`]
//! - **Commission routing**: [`CommissionRecipient`]
//!
//! A unit is content-addressed: its id is the base64 SHA-256 of the
//! canonical stripped form (authentifiers and transient spend proofs
//! removed). The optional `unit` field on the wire carries the sender's
//! claimed id and is always recomputed and checked by the validator.

use crate::payload::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Base64 SHA-256 of a canonical stripped unit. 44 characters.
pub type UnitId = String;

/// Base64 secondary hash of a stabilized unit (its DAG position skeleton).
pub type BallId = String;

/// Base32 checksummed hash of an address definition. 32 characters.
pub type Address = String;

// =============================================================================
// CLUSTER A: THE DAG
// =============================================================================

/// A unit together with its optional ball and skiplist, as exchanged with
/// peers and stored in the KV joint namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    /// The unit itself.
    pub unit: Unit,
    /// Ball id, present once the unit is stabilized (and in catchup data).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ball: Option<BallId>,
    /// Skiplist units referenced by the ball, for light-proof traversal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skiplist_units: Option<Vec<UnitId>>,
}

impl Joint {
    /// Wrap a bare unit.
    pub fn from_unit(unit: Unit) -> Self {
        Self {
            unit,
            ball: None,
            skiplist_units: None,
        }
    }
}

/// A DAG vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit format version, e.g. `"4.0"`.
    pub version: String,
    /// Network discriminator.
    pub alt: String,
    /// Content-addressed id. Optional on the wire; always recomputed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitId>,
    /// Ordered, deduplicated, lexicographically sorted parent ids.
    /// Empty only for the genesis unit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_units: Vec<UnitId>,
    /// Ball of the last stable unit this unit anchors to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ball: Option<BallId>,
    /// Unit id of the last-ball unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ball_unit: Option<UnitId>,
    /// Unit whose operator set this unit inherits. The genesis unit points
    /// to itself implicitly and lists its operators inline instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness_list_unit: Option<UnitId>,
    /// Inline operator list (genesis and pre-v4 units only), sorted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witnesses: Option<Vec<Address>>,
    /// Unix seconds claimed by the author.
    pub timestamp: u64,
    /// Unit authors, sorted by address.
    pub authors: Vec<Author>,
    /// Messages; replaced by `content_hash` if the unit goes final-bad.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    /// Optional redirection of earned headers commissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earned_headers_commission_recipients: Option<Vec<CommissionRecipient>>,
    /// Canonical byte size of the header portion.
    pub headers_commission: u32,
    /// Canonical byte size of the payload portion.
    pub payload_commission: u32,
    /// Declared congestion fee, required once TPS fees activate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tps_fee: Option<u64>,
    /// Replaces message content after a lost double-spend tie-break.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Unit {
    /// True for the single parentless unit of the network.
    pub fn is_genesis(&self) -> bool {
        self.parent_units.is_empty()
    }

    /// Major version number; `"4.0"` → 4. Unknown formats map to 0.
    pub fn version_major(&self) -> u32 {
        self.version
            .split('.')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Canonical-with-keys encoding applies from version 4.
    pub fn uses_keyed_canonical(&self) -> bool {
        self.version_major() >= 4
    }

    /// Addresses of all authors, in unit order (sorted by the shape rules).
    pub fn author_addresses(&self) -> Vec<&str> {
        self.authors.iter().map(|a| a.address.as_str()).collect()
    }

    /// The first author, who receives commissions by default.
    pub fn first_author_address(&self) -> Option<&str> {
        self.authors.first().map(|a| a.address.as_str())
    }

    /// Whether `address` authored this unit.
    pub fn is_authored_by(&self, address: &str) -> bool {
        self.authors.iter().any(|a| a.address == address)
    }

    /// Total declared cost of carrying this unit: header + payload
    /// commissions plus the congestion fee.
    pub fn total_commissions(&self) -> u64 {
        u64::from(self.headers_commission)
            + u64::from(self.payload_commission)
            + self.tps_fee.unwrap_or(0)
    }

    /// The claimed id, or an empty string. Validated units always carry it.
    pub fn id(&self) -> &str {
        self.unit.as_deref().unwrap_or("")
    }
}

/// A unit author: an address, its definition when first used or changed,
/// and authentifiers keyed by signing path (`"r"`, `"r.0.1"`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    /// Base32 checksummed address.
    pub address: Address,
    /// Address definition, required inline on first use and after a
    /// definition change; otherwise loaded from storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<serde_json::Value>,
    /// Signing path → signature (base64) or merkle element.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authentifiers: BTreeMap<String, String>,
}

/// One share of redirected headers commissions. Shares sum to 100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRecipient {
    /// Receiving address.
    pub address: Address,
    /// Integer percentage share, 1..=100.
    pub earned_headers_commission_share: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_unit() -> Unit {
        Unit {
            version: "4.0".into(),
            alt: "1".into(),
            unit: None,
            parent_units: vec![],
            last_ball: None,
            last_ball_unit: None,
            witness_list_unit: None,
            witnesses: None,
            timestamp: 1_700_000_000,
            authors: vec![Author {
                address: "A".repeat(32),
                definition: None,
                authentifiers: BTreeMap::new(),
            }],
            messages: vec![],
            earned_headers_commission_recipients: None,
            headers_commission: 300,
            payload_commission: 150,
            tps_fee: Some(10),
            content_hash: None,
        }
    }

    #[test]
    fn genesis_detection() {
        let u = minimal_unit();
        assert!(u.is_genesis());
    }

    #[test]
    fn version_parsing() {
        let mut u = minimal_unit();
        assert_eq!(u.version_major(), 4);
        assert!(u.uses_keyed_canonical());
        u.version = "1.0".into();
        assert!(!u.uses_keyed_canonical());
    }

    #[test]
    fn total_commissions_includes_tps_fee() {
        let u = minimal_unit();
        assert_eq!(u.total_commissions(), 460);
    }

    #[test]
    fn joint_roundtrips_through_json() {
        let joint = Joint::from_unit(minimal_unit());
        let text = serde_json::to_string(&joint).unwrap();
        let back: Joint = serde_json::from_str(&text).unwrap();
        assert_eq!(joint, back);
    }
}
