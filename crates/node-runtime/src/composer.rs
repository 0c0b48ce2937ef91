//! # Unit Composer
//!
//! Builds and signs payment units for locally held addresses. One
//! composition at a time per address (the `c-<address>` named mutex), and
//! every composition registers its pending fee debit with the in-flight
//! ledger so back-to-back compositions never count the same credit twice.

use crate::signer::Ed25519Signer;
use bc_01_hashing::{header_size, payload_hash_b64, payload_size, unit_digest, unit_id};
use bc_02_object_store::Store;
use bc_09_tps_fees::{min_tps_fee, InFlightLedger};
use bc_11_sync_kernel::MutexKernel;
use shared_types::{
    locks, network_params, Address, Author, Input, Joint, Message, MessageBody, Output,
    PayloadLocation, PaymentPayload, Unit, UnitId, ALT, MAX_PARENTS_PER_UNIT, VERSION,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Composition failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComposeError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] bc_02_object_store::StoreError),

    /// Not enough spendable outputs.
    #[error("insufficient funds: have {available}, need {required}")]
    Insufficient {
        /// Spendable sum found.
        available: u64,
        /// Target plus fees.
        required: u64,
    },

    /// No stable anchor yet (fresh network before genesis stabilizes).
    #[error("no stable last ball to anchor to")]
    NoStableAnchor,

    /// Unit assembly failed.
    #[error("assembly failed: {0}")]
    Assembly(String),
}

/// Composer for one node's addresses.
pub struct Composer {
    store: Store,
    kernel: MutexKernel,
    inflight: InFlightLedger,
}

impl Composer {
    /// New composer sharing the node's in-flight ledger.
    pub fn new(store: Store, kernel: MutexKernel, inflight: InFlightLedger) -> Self {
        Self {
            store,
            kernel,
            inflight,
        }
    }

    /// The in-flight ledger (drained by the stabilization observer).
    pub fn inflight(&self) -> &InFlightLedger {
        &self.inflight
    }

    /// Compose and sign a base-asset payment from the signer's address.
    pub async fn compose_payment(
        &self,
        signer: &Ed25519Signer,
        recipients: &[(Address, u64)],
    ) -> Result<Joint, ComposeError> {
        let address = signer.address();
        let _guard = self.kernel.lock(&locks::compose(&address)).await;

        // Anchor: the current stable point.
        let last_stable_mci = self.store.last_stable_mci();
        let last_ball_unit = self
            .store
            .mc_unit_at(last_stable_mci)?
            .ok_or(ComposeError::NoStableAnchor)?;
        if !self
            .store
            .unit_props(&last_ball_unit)?
            .map(|p| p.is_stable)
            .unwrap_or(false)
        {
            return Err(ComposeError::NoStableAnchor);
        }
        let last_ball = self
            .store
            .ball_of_unit(&last_ball_unit)?
            .ok_or(ComposeError::NoStableAnchor)?;

        // Parents: the current tips, sorted, bounded.
        let mut parents = self.store.free_units()?;
        parents.sort();
        parents.truncate(MAX_PARENTS_PER_UNIT);
        if parents.is_empty() {
            return Err(ComposeError::NoStableAnchor);
        }

        // Fee plan: declare only the shortfall against the available
        // balance (stored balance minus our own in-flight debits).
        let params = network_params();
        let (required_fee, declared_fee) = if params.tps_fees_active(last_stable_mci) {
            let required = min_tps_fee(&self.store, last_stable_mci)?;
            let available = self
                .inflight
                .available_balance(&self.store, &address, last_stable_mci)?;
            let declared = (required as i64 - available).max(0) as u64;
            (required, declared)
        } else {
            (0, 0)
        };

        let target: u64 = recipients.iter().map(|(_, amount)| amount).sum();

        // Spendable outputs: unspent, no serial claim, stable-visible.
        let mut available: u64 = 0;
        let mut selected: Vec<(UnitId, u32, u32, u64)> = Vec::new();
        for ((unit, msg, out), row) in self.store.outputs_of_address(&address, 10_000)? {
            if row.is_spent || row.asset.is_some() {
                continue;
            }
            if self.store.serial_spender_of(&unit, msg, out)?.is_some() {
                continue;
            }
            available += row.amount;
            selected.push((unit, msg, out, row.amount));
            // Selection is greedy; sizing below decides sufficiency.
            if available > target.saturating_mul(2).saturating_add(declared_fee + 100_000) {
                break;
            }
        }

        // Assemble with a fixed-length placeholder signature, iterate the
        // change amount to a commission fixed point, then sign for real.
        let mut change: u64 = 0;
        for _ in 0..6 {
            let unit = self.assemble(
                signer,
                &parents,
                &last_ball,
                &last_ball_unit,
                &selected,
                recipients,
                change,
                declared_fee,
                true,
            )?;
            let header = u64::from(
                header_size(&unit).map_err(|e| ComposeError::Assembly(e.to_string()))?,
            );
            let payload = u64::from(
                payload_size(&unit).map_err(|e| ComposeError::Assembly(e.to_string()))?,
            );
            let required = target + header + payload + declared_fee;
            if available < required {
                return Err(ComposeError::Insufficient {
                    available,
                    required,
                });
            }
            let next_change = available - required;
            if next_change == change {
                let mut unit = self.assemble(
                    signer,
                    &parents,
                    &last_ball,
                    &last_ball_unit,
                    &selected,
                    recipients,
                    change,
                    declared_fee,
                    true,
                )?;
                unit.headers_commission = header as u32;
                unit.payload_commission = payload as u32;
                let digest =
                    unit_digest(&unit).map_err(|e| ComposeError::Assembly(e.to_string()))?;
                unit.authors[0]
                    .authentifiers
                    .insert("r".to_string(), signer.sign_digest(&digest));
                let id = unit_id(&unit).map_err(|e| ComposeError::Assembly(e.to_string()))?;
                unit.unit = Some(id.clone());

                // Register the pending net debit before releasing the
                // compose lock: required minus declared is what the
                // balance will lose at stabilization.
                self.inflight
                    .note_composed(&address, &id, required_fee.saturating_sub(declared_fee));
                debug!(unit = %id, declared_fee, "payment composed");
                return Ok(Joint::from_unit(unit));
            }
            change = next_change;
        }
        Err(ComposeError::Assembly(
            "commission size did not converge".into(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        signer: &Ed25519Signer,
        parents: &[UnitId],
        last_ball: &str,
        last_ball_unit: &str,
        selected: &[(UnitId, u32, u32, u64)],
        recipients: &[(Address, u64)],
        change: u64,
        declared_fee: u64,
        include_definition: bool,
    ) -> Result<Unit, ComposeError> {
        let address = signer.address();
        let params = network_params();

        let inputs: Vec<Input> = selected
            .iter()
            .map(|(unit, msg, out, _)| Input::Transfer {
                unit: unit.clone(),
                message_index: *msg,
                output_index: *out,
            })
            .collect();
        let mut outputs: Vec<Output> = recipients
            .iter()
            .map(|(to, amount)| Output {
                address: to.clone(),
                amount: *amount,
                blinding: None,
                output_hash: None,
            })
            .collect();
        if change > 0 {
            outputs.push(Output {
                address: address.clone(),
                amount: change,
                blinding: None,
                output_hash: None,
            });
        }
        outputs.sort_by(|a, b| (&a.address, a.amount).cmp(&(&b.address, b.amount)));

        let payment = PaymentPayload {
            asset: None,
            denomination: None,
            inputs,
            outputs,
        };
        let payload_value =
            serde_json::to_value(&payment).map_err(|e| ComposeError::Assembly(e.to_string()))?;
        let payload_hash = payload_hash_b64(&payload_value, true)
            .map_err(|e| ComposeError::Assembly(e.to_string()))?;

        let mut authentifiers = BTreeMap::new();
        authentifiers.insert("r".to_string(), Ed25519Signer::placeholder_authentifier());

        // First use of the address must reveal the definition.
        let definition = if include_definition
            && self.store.definition(&address)?.is_none()
        {
            Some(signer.definition())
        } else {
            None
        };

        // Timestamp: at least the parents' maximum; composition is the one
        // place wall clock legitimately enters.
        let mut timestamp = now_secs();
        for parent in parents {
            if let Some(props) = self.store.unit_props(parent)? {
                timestamp = timestamp.max(props.timestamp);
            }
        }

        Ok(Unit {
            version: VERSION.into(),
            alt: ALT.into(),
            unit: None,
            parent_units: parents.to_vec(),
            last_ball: Some(last_ball.to_string()),
            last_ball_unit: Some(last_ball_unit.to_string()),
            witness_list_unit: Some(params.genesis_unit.clone()),
            witnesses: None,
            timestamp,
            authors: vec![Author {
                address,
                definition,
                authentifiers,
            }],
            messages: vec![Message {
                body: MessageBody::Payment(payment),
                payload_location: PayloadLocation::Inline,
                payload_hash,
            }],
            earned_headers_commission_recipients: None,
            headers_commission: 0,
            payload_commission: 0,
            tps_fee: if params.tps_fees_active(self.store.last_stable_mci()) {
                Some(declared_fee)
            } else {
                None
            },
            content_hash: None,
        })
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
