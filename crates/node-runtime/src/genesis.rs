//! # Genesis Builder
//!
//! Builds the single parentless unit of a private network: the operator
//! committee signs it, the full base supply is issued in it, and its id
//! becomes the network identity. The timestamp is supplied by the
//! caller, never sampled from a clock - two genesis derivations differing only in
//! timestamp produce incompatible networks, which the parameter
//! installation layer then refuses to mix.

use crate::signer::Ed25519Signer;
use bc_01_hashing::{header_size, payload_hash_b64, payload_size, unit_digest, unit_id};
use shared_types::{
    Address, Author, Input, Joint, Message, MessageBody, NetworkParams, Output, PayloadLocation,
    PaymentPayload, Unit, ALT, COUNT_OPERATORS, TOTAL_BASE_SUPPLY, VERSION,
};
use std::collections::BTreeMap;
use thiserror::Error;

/// What a new network starts from.
pub struct GenesisSpec<'a> {
    /// The operator committee's keys; exactly `COUNT_OPERATORS`.
    pub operators: &'a [Ed25519Signer],
    /// Initial grants; the remainder of the supply goes to the first
    /// operator.
    pub initial_outputs: Vec<(Address, u64)>,
    /// The network-defining timestamp.
    pub timestamp: u64,
}

/// Genesis construction failures.
#[derive(Debug, Error)]
pub enum GenesisError {
    /// Wrong committee size.
    #[error("genesis needs exactly {expected} operators, got {got}")]
    OperatorCount {
        /// Required committee size.
        expected: usize,
        /// Provided committee size.
        got: usize,
    },

    /// Grants exceed the supply after commissions.
    #[error("initial grants exceed the issuable supply")]
    Overspent,

    /// Hashing failed (malformed definitions).
    #[error("cannot hash genesis: {0}")]
    Hashing(String),
}

/// Build and sign the genesis joint; returns it with the network
/// parameters it defines.
pub fn build_genesis(spec: &GenesisSpec<'_>) -> Result<(Joint, NetworkParams), GenesisError> {
    if spec.operators.len() != COUNT_OPERATORS {
        return Err(GenesisError::OperatorCount {
            expected: COUNT_OPERATORS,
            got: spec.operators.len(),
        });
    }
    // Authors (and the witness list) are sorted by address.
    let mut signers: Vec<&Ed25519Signer> = spec.operators.iter().collect();
    signers.sort_by_key(|s| s.address());
    let operator_addresses: Vec<Address> = signers.iter().map(|s| s.address()).collect();

    let granted: u64 = spec.initial_outputs.iter().map(|(_, amount)| amount).sum();
    if granted >= TOTAL_BASE_SUPPLY {
        return Err(GenesisError::Overspent);
    }

    // Commission sizes depend on the remainder's digit count; iterate to
    // a fixed point with placeholder authentifiers of real length.
    let mut remainder = TOTAL_BASE_SUPPLY - granted;
    for _ in 0..5 {
        let unit = assemble(spec, &signers, &operator_addresses, remainder)
            .map_err(GenesisError::Hashing)?;
        let header = u64::from(header_size(&unit).map_err(|e| GenesisError::Hashing(e.to_string()))?);
        let payload =
            u64::from(payload_size(&unit).map_err(|e| GenesisError::Hashing(e.to_string()))?);
        let spendable = TOTAL_BASE_SUPPLY
            .checked_sub(granted)
            .and_then(|r| r.checked_sub(header + payload))
            .ok_or(GenesisError::Overspent)?;
        if spendable == remainder {
            // Converged: assemble the real unit and sign it.
            let mut unit = assemble(spec, &signers, &operator_addresses, remainder)
                .map_err(GenesisError::Hashing)?;
            unit.headers_commission = header as u32;
            unit.payload_commission = payload as u32;
            let digest = unit_digest(&unit).map_err(|e| GenesisError::Hashing(e.to_string()))?;
            for (author, signer) in unit.authors.iter_mut().zip(signers.iter()) {
                author
                    .authentifiers
                    .insert("r".to_string(), signer.sign_digest(&digest));
            }
            let id = unit_id(&unit).map_err(|e| GenesisError::Hashing(e.to_string()))?;
            unit.unit = Some(id.clone());
            let params = NetworkParams::private_network(id, operator_addresses);
            return Ok((Joint::from_unit(unit), params));
        }
        remainder = spendable;
    }
    Err(GenesisError::Hashing(
        "commission size did not converge".into(),
    ))
}

fn assemble(
    spec: &GenesisSpec<'_>,
    signers: &[&Ed25519Signer],
    operator_addresses: &[Address],
    remainder: u64,
) -> Result<Unit, String> {
    let mut outputs: Vec<Output> = spec
        .initial_outputs
        .iter()
        .map(|(address, amount)| Output {
            address: address.clone(),
            amount: *amount,
            blinding: None,
            output_hash: None,
        })
        .collect();
    outputs.push(Output {
        address: operator_addresses[0].clone(),
        amount: remainder,
        blinding: None,
        output_hash: None,
    });
    outputs.sort_by(|a, b| (&a.address, a.amount).cmp(&(&b.address, b.amount)));

    let payment = PaymentPayload {
        asset: None,
        denomination: None,
        inputs: vec![Input::Issue {
            amount: TOTAL_BASE_SUPPLY,
            serial_number: 1,
            address: None,
        }],
        outputs,
    };
    let payload_value = serde_json::to_value(&payment).map_err(|e| e.to_string())?;
    let payload_hash = payload_hash_b64(&payload_value, true).map_err(|e| e.to_string())?;

    let authors = signers
        .iter()
        .map(|signer| {
            let mut authentifiers = BTreeMap::new();
            // Real signatures replace these after sizing; the encoded
            // length is identical either way.
            authentifiers.insert("r".to_string(), Ed25519Signer::placeholder_authentifier());
            Author {
                address: signer.address(),
                definition: Some(signer.definition()),
                authentifiers,
            }
        })
        .collect();

    Ok(Unit {
        version: VERSION.into(),
        alt: ALT.into(),
        unit: None,
        parent_units: vec![],
        last_ball: None,
        last_ball_unit: None,
        witness_list_unit: None,
        witnesses: Some(operator_addresses.to_vec()),
        timestamp: spec.timestamp,
        authors,
        messages: vec![Message {
            body: MessageBody::Payment(payment),
            payload_location: PayloadLocation::Inline,
            payload_hash,
        }],
        earned_headers_commission_recipients: None,
        headers_commission: 0,
        payload_commission: 0,
        tps_fee: None,
        content_hash: None,
    })
}
