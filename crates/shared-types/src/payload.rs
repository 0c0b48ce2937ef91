//! # Message Payloads
//!
//! A unit carries one or more messages; each message is an app tag plus an
//! app-specific payload. The payload enum is a sealed sum type so that
//! app-specific checks dispatch on variants rather than runtime-typed maps.

use crate::entities::{Address, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a message's payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadLocation {
    /// Payload embedded in the unit.
    Inline,
    /// Payload distributed privately; only its hash is on-DAG.
    None,
    /// Payload stored under its hash (large payloads).
    Uri,
}

/// One message inside a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// App tag and typed payload.
    #[serde(flatten)]
    pub body: MessageBody,
    /// Where the payload is.
    pub payload_location: PayloadLocation,
    /// Base64 SHA-256 of the canonical payload.
    pub payload_hash: String,
}

/// App-tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "app", content = "payload", rename_all = "snake_case")]
pub enum MessageBody {
    /// Value transfer in the base asset or a custom asset.
    Payment(PaymentPayload),
    /// Oracle-posted name/value pairs, indexed for definition predicates.
    DataFeed(BTreeMap<String, FeedValue>),
    /// Free-form text.
    Text(String),
    /// Free-form structured data.
    Data(serde_json::Value),
    /// Attestation of profile fields for an address.
    Attestation(AttestationPayload),
    /// Retargets an address to a new definition hash.
    AddressDefinitionChange(AddressDefinitionChangePayload),
    /// Deploys an autonomous agent.
    Definition(AaDefinitionPayload),
    /// Defines a custom asset.
    Asset(AssetPayload),
    /// Governance vote on a system variable.
    SystemVote(SystemVotePayload),
    /// Requests a tally of votes for one subject.
    SystemVoteCount(SystemSubject),
    /// Opens a poll.
    Poll(PollPayload),
    /// Casts a vote in a poll.
    Vote(VotePayload),
}

impl MessageBody {
    /// The wire app tag of this payload.
    pub fn app(&self) -> &'static str {
        match self {
            MessageBody::Payment(_) => "payment",
            MessageBody::DataFeed(_) => "data_feed",
            MessageBody::Text(_) => "text",
            MessageBody::Data(_) => "data",
            MessageBody::Attestation(_) => "attestation",
            MessageBody::AddressDefinitionChange(_) => "address_definition_change",
            MessageBody::Definition(_) => "definition",
            MessageBody::Asset(_) => "asset",
            MessageBody::SystemVote(_) => "system_vote",
            MessageBody::SystemVoteCount(_) => "system_vote_count",
            MessageBody::Poll(_) => "poll",
            MessageBody::Vote(_) => "vote",
        }
    }
}

// =============================================================================
// Payments
// =============================================================================

/// A payment: inputs consumed and outputs produced, single asset and
/// denomination per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    /// Asset unit id; `None` means the base asset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<UnitId>,
    /// Denomination for fixed-denomination assets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denomination: Option<u32>,
    /// Consumed inputs.
    pub inputs: Vec<Input>,
    /// Produced outputs, sorted by (address, amount).
    pub outputs: Vec<Output>,
}

impl PaymentPayload {
    /// Sum of all output amounts, with overflow detection.
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
    }
}

/// A payment input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    /// Spends a prior output.
    Transfer {
        /// Unit that produced the output.
        unit: UnitId,
        /// Message index inside that unit.
        message_index: u32,
        /// Output index inside that message.
        output_index: u32,
    },
    /// Mints asset supply (or the one-time base issue at genesis).
    Issue {
        /// Amount issued.
        amount: u64,
        /// Monotonic issue counter per (asset, address).
        serial_number: u64,
        /// Issuing address when it is not the first author.
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<Address>,
    },
    /// Collects headers commissions earned over an MCI range.
    HeadersCommission {
        /// First MCI of the collected range.
        from_main_chain_index: u64,
        /// Last MCI of the collected range.
        to_main_chain_index: u64,
    },
    /// Collects witnessing income over an MCI range.
    Witnessing {
        /// First MCI of the collected range.
        from_main_chain_index: u64,
        /// Last MCI of the collected range.
        to_main_chain_index: u64,
    },
}

impl Input {
    /// The (unit, message, output) triple of a transfer input.
    pub fn source(&self) -> Option<(&str, u32, u32)> {
        match self {
            Input::Transfer {
                unit,
                message_index,
                output_index,
            } => Some((unit.as_str(), *message_index, *output_index)),
            _ => None,
        }
    }
}

/// A payment output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Receiving address.
    pub address: Address,
    /// Amount in the message's asset and denomination.
    pub amount: u64,
    /// Blinding factor for private assets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blinding: Option<String>,
    /// Hash of (address, blinding) for private assets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
}

// =============================================================================
// Data feeds & attestations
// =============================================================================

/// A data feed value: the protocol distinguishes text from integer values
/// when indexing and comparing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedValue {
    /// Text value.
    String(String),
    /// Integer value. Floats are not accepted in feeds.
    Number(i64),
}

impl FeedValue {
    /// Canonical text form used in KV index keys.
    pub fn index_text(&self) -> String {
        match self {
            FeedValue::String(s) => s.clone(),
            FeedValue::Number(n) => n.to_string(),
        }
    }

    /// Type discriminator used in KV index keys (`"s"` / `"n"`).
    pub fn type_tag(&self) -> &'static str {
        match self {
            FeedValue::String(_) => "s",
            FeedValue::Number(_) => "n",
        }
    }
}

/// An attestation of off-chain profile data for an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationPayload {
    /// The attested address.
    pub address: Address,
    /// Attested profile fields (possibly hashed by the attestor).
    pub profile: BTreeMap<String, serde_json::Value>,
}

/// Retargets an author address to a new definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressDefinitionChangePayload {
    /// Address being changed; defaults to the single author.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Hash of the next definition, revealed on first use.
    pub definition_chash: Address,
}

// =============================================================================
// Autonomous agents
// =============================================================================

/// Deploys an autonomous agent: its address is the hash of the definition
/// (the literal JSON text for parameterized agents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AaDefinitionPayload {
    /// AA address derived from the definition.
    pub address: Address,
    /// `["autonomous agent", {...}]` template, or `{base_aa, params}`.
    pub definition: serde_json::Value,
}

// =============================================================================
// Assets
// =============================================================================

/// Custom asset properties, fixed at definition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPayload {
    /// Total supply cap; `None` for uncapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<u64>,
    /// Payments are hidden (hash-only on the DAG).
    pub is_private: bool,
    /// Holders may transfer to third parties.
    pub is_transferrable: bool,
    /// Payments to the definer burn the asset.
    pub auto_destroy: bool,
    /// Amounts restricted to listed denominations.
    pub fixed_denominations: bool,
    /// Only the definer may issue.
    pub issued_by_definer_only: bool,
    /// Every transfer requires the definer's cosignature.
    pub cosigned_by_definer: bool,
    /// Spenders must hold an attestation from a listed attestor.
    pub spender_attested: bool,
    /// Attestor whitelist, when `spender_attested`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestors: Option<Vec<Address>>,
    /// Denomination list, when `fixed_denominations`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denominations: Option<Vec<Denomination>>,
}

/// One allowed denomination of a fixed-denomination asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denomination {
    /// The denomination value.
    pub denomination: u32,
    /// Supply cap for this denomination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_coins: Option<u64>,
}

// =============================================================================
// Governance
// =============================================================================

/// Subjects governed by system votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemSubject {
    /// The operator committee.
    OpList,
    /// Threshold unit size for the congestion curve.
    ThresholdSize,
    /// Base congestion fee.
    BaseTpsFee,
    /// Congestion smoothing interval.
    TpsInterval,
    /// Congestion fee multiplier.
    TpsFeeMultiplier,
}

/// A governance vote. Each address has at most one active vote per subject;
/// a later vote replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subject", content = "value", rename_all = "snake_case")]
pub enum SystemVotePayload {
    /// Vote for an operator committee (exactly `COUNT_OPERATORS` sorted
    /// addresses).
    OpList(Vec<Address>),
    /// Vote for a numerical subject value.
    ThresholdSize(u64),
    /// Vote for the base congestion fee.
    BaseTpsFee(u64),
    /// Vote for the congestion smoothing interval.
    TpsInterval(u64),
    /// Vote for the congestion fee multiplier.
    TpsFeeMultiplier(u64),
}

impl SystemVotePayload {
    /// The subject this vote concerns.
    pub fn subject(&self) -> SystemSubject {
        match self {
            SystemVotePayload::OpList(_) => SystemSubject::OpList,
            SystemVotePayload::ThresholdSize(_) => SystemSubject::ThresholdSize,
            SystemVotePayload::BaseTpsFee(_) => SystemSubject::BaseTpsFee,
            SystemVotePayload::TpsInterval(_) => SystemSubject::TpsInterval,
            SystemVotePayload::TpsFeeMultiplier(_) => SystemSubject::TpsFeeMultiplier,
        }
    }
}

/// Opens a poll with a fixed choice list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPayload {
    /// Poll question.
    pub question: String,
    /// Allowed choices.
    pub choices: Vec<String>,
}

/// Casts a vote in a previously opened poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotePayload {
    /// Unit that carried the poll.
    pub unit: UnitId,
    /// Chosen option, one of the poll's choices.
    pub choice: String,
}
