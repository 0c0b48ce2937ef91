//! # Row Types
//!
//! Typed rows of the relational side, bincode-encoded under the keys of
//! [`crate::keys`]. Rows are flat: JSON subtrees that must round-trip
//! byte-exactly (definitions, profiles) are stored as JSON text.

use serde::{Deserialize, Serialize};
use shared_types::{Address, BallId, Sequence, SystemSubject, UnitId, UnitProps};

/// The `units` table row: graph props plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRow {
    /// Graph-level properties.
    pub props: UnitProps,
    /// Count of not-yet-stable messages referencing this unit; guards
    /// cache eviction.
    pub unstable_message_refs: u32,
}

/// The `unit_authors` + `authentifiers` row for one (unit, author).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorRow {
    /// Author address.
    pub address: Address,
    /// Definition chash in force when this unit was validated.
    pub definition_chash: Address,
    /// Signing path → authentifier.
    pub authentifiers: Vec<(String, String)>,
}

/// An `outputs` table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    /// Receiving address.
    pub address: Address,
    /// Amount.
    pub amount: u64,
    /// Asset (`None` = base).
    pub asset: Option<UnitId>,
    /// Denomination for fixed-denomination assets.
    pub denomination: Option<u32>,
    /// Set when a stable serial spend consumes this output.
    pub is_spent: bool,
}

/// Kind discriminator for [`InputRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputKind {
    /// Spend of `(src_unit, src_message_index, src_output_index)`.
    Transfer {
        /// Source unit.
        src_unit: UnitId,
        /// Source message index.
        src_message_index: u32,
        /// Source output index.
        src_output_index: u32,
    },
    /// Issue of asset supply.
    Issue {
        /// Issued amount.
        amount: u64,
        /// Issue serial number.
        serial_number: u64,
    },
    /// Headers-commission collection over an MCI range.
    HeadersCommission {
        /// Range start.
        from_mci: u64,
        /// Range end.
        to_mci: u64,
    },
    /// Witnessing-income collection over an MCI range.
    Witnessing {
        /// Range start.
        from_mci: u64,
        /// Range end.
        to_mci: u64,
    },
}

/// An `inputs` table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRow {
    /// What is being consumed.
    pub kind: InputKind,
    /// Address whose funds are consumed.
    pub address: Address,
    /// Asset (`None` = base).
    pub asset: Option<UnitId>,
    /// Serial flag: `Some(())`-like when this input claims the serial
    /// spend of its source; `None` for deliberately accepted conflicts.
    pub is_unique: Option<bool>,
}

/// A stored address definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRow {
    /// Definition JSON text (byte-exact round-trip).
    pub definition_json: String,
    /// Unit that revealed this definition.
    pub unit: UnitId,
    /// Whether the owning address has since moved to another definition.
    pub has_reference: bool,
}

/// An `assets` table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRow {
    /// Asset payload JSON text.
    pub payload_json: String,
    /// Defining address (first author of the defining unit).
    pub definer: Address,
    /// MCI at which the definition stabilized, if it has.
    pub mci: Option<u64>,
}

/// An `aa_addresses` table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AaRow {
    /// AA definition JSON text (literal form for parameterized agents).
    pub definition_json: String,
    /// Base AA for parameterized agents.
    pub base_aa: Option<Address>,
    /// Deploying unit.
    pub unit: UnitId,
    /// MCI at which the deployment stabilized.
    pub mci: Option<u64>,
}

/// An `aa_triggers` queue row: a stabilized unit addressed to an AA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AaTriggerRow {
    /// Triggering unit.
    pub unit: UnitId,
    /// Target AA.
    pub aa_address: Address,
    /// Whether this trigger was produced by another AA (secondary).
    pub is_secondary: bool,
}

/// An `aa_responses` table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AaResponseRow {
    /// Trigger unit this responds to.
    pub trigger_unit: UnitId,
    /// Target AA.
    pub aa_address: Address,
    /// MCI of the trigger.
    pub mci: u64,
    /// Whether the handler bounced.
    pub bounced: bool,
    /// Response unit saved by the engine, if any.
    pub response_unit: Option<UnitId>,
    /// Response metadata JSON.
    pub response_json: String,
}

/// A `system_votes` row: the active vote of one address on one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemVoteRow {
    /// Voted value, JSON-encoded (address list or number).
    pub value_json: String,
    /// Unit carrying the vote.
    pub unit: UnitId,
    /// MCI at which the vote stabilized.
    pub mci: u64,
}

/// A governed system variable value, effective from `since` MCI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemVarRow {
    /// Value, JSON-encoded.
    pub value_json: String,
    /// Unit whose vote-count message triggered the recomputation.
    pub vote_count_unit: Option<UnitId>,
}

/// A permanently rejected joint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownBadRow {
    /// Rejection reason.
    pub error: String,
    /// Wire code of the rejection.
    pub code: String,
    /// Receipt time (unix seconds).
    pub received_at: u64,
    /// Joint JSON for diagnostics.
    pub joint_json: String,
}

/// A parked joint awaiting dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnhandledRow {
    /// Joint JSON.
    pub joint_json: String,
    /// Peer that sent it.
    pub peer: String,
    /// Park time (unix seconds); evicted after the TTL.
    pub parked_at: u64,
    /// Units this joint waits for.
    pub missing_units: Vec<UnitId>,
}

/// The `balls` row pair is plain strings (unit ↔ ball); no struct needed.
pub type BallRow = BallId;

/// Sequence repair journal entry used when stabilization flips a loser to
/// final-bad: kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceFlipRow {
    /// Affected unit.
    pub unit: UnitId,
    /// Old sequence.
    pub from: Sequence,
    /// New sequence.
    pub to: Sequence,
    /// Stabilization MCI that decided the tie.
    pub decided_at_mci: u64,
}

/// Typed accessor for governed numeric subjects, shared by fee logic and
/// validation.
pub fn numeric_subject_default(subject: SystemSubject) -> u64 {
    match subject {
        SystemSubject::ThresholdSize => 10_000,
        SystemSubject::BaseTpsFee => 10,
        SystemSubject::TpsInterval => 1,
        SystemSubject::TpsFeeMultiplier => 10,
        SystemSubject::OpList => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_row_bincode_roundtrip() {
        let row = InputRow {
            kind: InputKind::Transfer {
                src_unit: "U".into(),
                src_message_index: 0,
                src_output_index: 1,
            },
            address: "ADDR".into(),
            asset: None,
            is_unique: Some(true),
        };
        let bytes = bincode::serialize(&row).unwrap();
        let back: InputRow = bincode::deserialize(&bytes).unwrap();
        assert_eq!(row, back);
    }

    #[test]
    fn numeric_defaults_are_positive() {
        assert!(numeric_subject_default(SystemSubject::BaseTpsFee) > 0);
        assert!(numeric_subject_default(SystemSubject::ThresholdSize) > 0);
    }
}
