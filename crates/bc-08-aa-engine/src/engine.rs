//! # Trigger Sequencer
//!
//! Executes agent handlers inside the stabilization transaction, in the
//! deterministic order (MCI, position within MCI, message index).
//! Secondary triggers produced by response payments append to the same
//! MCI's FIFO. State mutations land in the KV batch (and thus commit with
//! stabilization); response joints are returned for the writer to save.
//!
//! A handler failure bounces the trigger: funds conceptually return, no
//! state changes apply, and the bounce is recorded. Handler failures are
//! a function of content and state, so every node bounces identically.

use crate::errors::AaError;
use crate::evaluator::{AaEvaluator, AaOutcome};
use crate::state_view::StateView;
use crate::trigger::{triggers_of_unit, Trigger};
use bc_01_hashing::{header_size, payload_hash_b64, payload_size, unit_id};
use bc_02_object_store::{
    keys, AaResponseRow, AaTriggerRow, KvBatch, Store, StoreTx,
};
use bc_06_main_chain::{McError, StabilizationHooks, StabilizedUnit};
use serde_json::Value;
use shared_types::{
    Author, Input, Joint, Message, MessageBody, Output, PayloadLocation, PaymentPayload,
    Sequence, Unit, ALT, VERSION,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// The sequencer. Plugged into the stabilizer as its hooks.
pub struct AaEngine {
    evaluator: Arc<dyn AaEvaluator>,
}

/// Result of an estimation run: the outcome plus the state as it WOULD
/// look, returned as a fresh value so the caller cannot corrupt shared
/// state through it.
#[derive(Debug, Clone)]
pub struct Estimation {
    /// What the handler would do.
    pub outcome: AaOutcome,
    /// Post-run state view (a copy).
    pub post_state: StateView,
}

impl AaEngine {
    /// Engine with the given evaluator.
    pub fn new(evaluator: Arc<dyn AaEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Estimation mode for peripheral tools: runs the evaluator against a
    /// COPY of the state view and never touches stored state.
    pub fn estimate(&self, store: &Store, trigger: &Trigger) -> Result<Estimation, AaError> {
        let aa = store
            .aa_row(&trigger.aa_address)?
            .ok_or_else(|| AaError::BadDefinition {
                address: trigger.aa_address.clone(),
                detail: "agent is not deployed".into(),
            })?;
        let shared = StateView::load(store, &trigger.aa_address, &BTreeMap::new())?;
        let mut copy = shared.estimation_copy();
        let outcome = self
            .evaluator
            .evaluate(&aa.definition_json, trigger, &copy)?;
        if !outcome.bounced {
            copy = apply_to_copy(copy, &outcome);
        }
        Ok(Estimation {
            outcome,
            post_state: copy,
        })
    }

    fn execute_trigger(
        &self,
        store: &Store,
        tx: &mut StoreTx<'_>,
        kv: &mut KvBatch<'_>,
        mci: u64,
        position: u32,
        trigger: &Trigger,
        overlays: &mut BTreeMap<String, BTreeMap<String, Option<Value>>>,
    ) -> Result<Option<Joint>, McError> {
        tx.enqueue_aa_trigger(
            mci,
            position,
            &AaTriggerRow {
                unit: trigger.unit.clone(),
                aa_address: trigger.aa_address.clone(),
                is_secondary: trigger.is_secondary,
            },
        )?;

        let Some(aa) = aa_row_tx(tx, &trigger.aa_address)? else {
            warn!(aa = %trigger.aa_address, "trigger targets an undeployed agent");
            return Ok(None);
        };

        let overlay = overlays.entry(trigger.aa_address.clone()).or_default();
        let view = StateView::load(store, &trigger.aa_address, overlay)
            .map_err(|e| McError::Hook(e.to_string()))?;

        let outcome = match self.evaluator.evaluate(&aa.definition_json, trigger, &view) {
            Ok(outcome) => outcome,
            // Evaluator failures are content-determined: every node
            // observes the same failure, so bouncing is deterministic.
            Err(e) => AaOutcome {
                bounced: true,
                response: serde_json::json!({ "error": e.to_string() }),
                ..AaOutcome::default()
            },
        };

        let mut response_unit_id = None;
        let mut response_joint = None;
        if !outcome.bounced {
            for (var, staged) in &outcome.mutations {
                overlay.insert(var.clone(), staged.clone());
                let key = keys::kv_state_var(&trigger.aa_address, var);
                match staged {
                    Some(value) => kv
                        .put(
                            key,
                            serde_json::to_vec(value)
                                .map_err(|e| McError::Hook(e.to_string()))?,
                        )
                        .map_err(McError::Store)?,
                    None => kv.delete(key).map_err(McError::Store)?,
                }
            }
            if !outcome.payments.is_empty() {
                match build_response_joint(trigger, &outcome) {
                    Ok(joint) => {
                        response_unit_id = joint.unit.unit.clone();
                        response_joint = Some(joint);
                    }
                    Err(e) => {
                        // Under-funded payments bounce instead of abort.
                        debug!(error = %e, "response construction bounced");
                        return self.record_bounce(tx, mci, trigger, e.to_string());
                    }
                }
            }
        }

        tx.record_aa_response(&AaResponseRow {
            trigger_unit: trigger.unit.clone(),
            aa_address: trigger.aa_address.clone(),
            mci,
            bounced: outcome.bounced,
            response_unit: response_unit_id,
            response_json: outcome.response.to_string(),
        })?;

        // Balance bookkeeping: received minus forwarded.
        let prior: u64 = tx
            .get::<u64>(&keys::aa_balance(&trigger.aa_address, "base"))?
            .unwrap_or(0);
        let received = trigger.total_amount();
        let spent: u64 = response_joint
            .as_ref()
            .map(|j| spent_by_response(&j.unit))
            .unwrap_or(0);
        tx.set_aa_balance(
            &trigger.aa_address,
            "base",
            prior.saturating_add(received).saturating_sub(spent),
        )?;

        Ok(response_joint)
    }

    fn record_bounce(
        &self,
        tx: &mut StoreTx<'_>,
        mci: u64,
        trigger: &Trigger,
        reason: String,
    ) -> Result<Option<Joint>, McError> {
        tx.record_aa_response(&AaResponseRow {
            trigger_unit: trigger.unit.clone(),
            aa_address: trigger.aa_address.clone(),
            mci,
            bounced: true,
            response_unit: None,
            response_json: serde_json::json!({ "error": reason }).to_string(),
        })?;
        Ok(None)
    }
}

impl StabilizationHooks for AaEngine {
    fn on_mci_stabilized(
        &self,
        store: &Store,
        tx: &mut StoreTx<'_>,
        kv: &mut KvBatch<'_>,
        mci: u64,
        stabilized: &[StabilizedUnit],
    ) -> Result<Vec<Joint>, McError> {
        // Deployment visibility must include rows staged earlier in this
        // same stabilization transaction; reading committed state only
        // would make trigger firing depend on batch boundaries.
        let mut queue: VecDeque<Trigger> = VecDeque::new();
        for entry in stabilized {
            if entry.sequence != Sequence::Good {
                continue;
            }
            let Some(joint) = store.joint(&entry.unit)? else {
                continue;
            };
            let is_aa = |address: &str| is_aa_tx(tx, address);
            for trigger in triggers_of_unit(&entry.unit, &joint.unit, &is_aa, false) {
                queue.push_back(trigger);
            }
        }

        // Seed the state overlays with whatever earlier MCIs of this same
        // batch already staged in the KV batch, so a two-MCI batch and
        // two one-MCI batches see identical state.
        let mut overlays: BTreeMap<String, BTreeMap<String, Option<Value>>> = BTreeMap::new();
        for (key, staged) in kv.staged_with_prefix(b"st\n") {
            let parts = keys::parts(&key);
            // st\n<aa_address>\n<var>
            let (Some(aa), Some(var)) = (parts.get(1), parts.get(2)) else {
                continue;
            };
            let value = match staged {
                Some(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(v) => Some(v),
                    Err(_) => continue,
                },
                None => None,
            };
            overlays
                .entry(aa.clone())
                .or_default()
                .insert(var.clone(), value);
        }
        let mut responses = Vec::new();
        let mut position: u32 = 0;
        while let Some(trigger) = queue.pop_front() {
            debug!(aa = %trigger.aa_address, unit = %trigger.unit, mci, "executing trigger");
            let response = self.execute_trigger(
                store,
                tx,
                kv,
                mci,
                position,
                &trigger,
                &mut overlays,
            )?;
            position += 1;
            if let Some(joint) = response {
                // Payments to other agents become secondary triggers,
                // processed in this MCI's FIFO.
                if let Some(unit_id) = &joint.unit.unit {
                    let is_aa = |address: &str| is_aa_tx(tx, address);
                    for secondary in triggers_of_unit(unit_id, &joint.unit, &is_aa, true) {
                        if secondary.aa_address != trigger.aa_address {
                            queue.push_back(secondary);
                        }
                    }
                }
                responses.push(joint);
            }
        }
        Ok(responses)
    }
}

fn aa_row_tx(
    tx: &StoreTx<'_>,
    address: &str,
) -> Result<Option<bc_02_object_store::AaRow>, McError> {
    Ok(tx.get(&keys::aa_address(address))?)
}

fn is_aa_tx(tx: &StoreTx<'_>, address: &str) -> bool {
    tx.exists(&keys::aa_address(address)).unwrap_or(false)
}

fn apply_to_copy(mut copy: StateView, outcome: &AaOutcome) -> StateView {
    // StateView exposes no mutation API on purpose; rebuild through the
    // overlay path used by real execution.
    let mut vars = copy.vars().clone();
    for (var, staged) in &outcome.mutations {
        match staged {
            Some(value) => {
                vars.insert(var.clone(), value.clone());
            }
            None => {
                vars.remove(var);
            }
        }
    }
    copy = StateView::from_vars(copy.aa_address().to_string(), vars);
    copy
}

fn spent_by_response(unit: &Unit) -> u64 {
    unit.messages
        .iter()
        .filter_map(|m| match &m.body {
            MessageBody::Payment(p) => p.total_output(),
            _ => None,
        })
        .sum::<u64>()
        .saturating_add(unit.total_commissions())
}

/// Build the deterministic response joint: it spends exactly the outputs
/// that triggered the agent, pays the intents, and returns change to the
/// agent. Everything is derived from the trigger and committed state;
/// wall-clock never enters.
fn build_response_joint(trigger: &Trigger, outcome: &AaOutcome) -> Result<Joint, AaError> {
    let total_in = trigger.total_amount();
    let payments_total: u64 = outcome.payments.iter().map(|p| p.amount).sum();

    let inputs: Vec<Input> = trigger
        .outputs
        .iter()
        .map(|(msg, out, _)| Input::Transfer {
            unit: trigger.unit.clone(),
            message_index: *msg,
            output_index: *out,
        })
        .collect();

    // Commission size depends on the change amount's digits; iterate to a
    // fixed point (digit counts move at most once per round).
    let mut change: u64 = total_in.saturating_sub(payments_total);
    for _ in 0..5 {
        let unit = assemble_response_unit(trigger, outcome, &inputs, change)?;
        let header = header_size(&unit).map_err(|e| AaError::ResponseBuild(e.to_string()))?;
        let payload = payload_size(&unit).map_err(|e| AaError::ResponseBuild(e.to_string()))?;
        let fees = u64::from(header) + u64::from(payload);
        let required = payments_total
            .checked_add(fees)
            .ok_or_else(|| AaError::ResponseBuild("fee overflow".into()))?;
        if total_in < required {
            return Err(AaError::ResponseBuild(format!(
                "trigger amount {total_in} cannot cover payments {payments_total} plus fees {fees}"
            )));
        }
        let next_change = total_in - required;
        if next_change == change {
            let mut unit = assemble_response_unit(trigger, outcome, &inputs, change)?;
            unit.headers_commission = header;
            unit.payload_commission = payload;
            let id = unit_id(&unit).map_err(|e| AaError::ResponseBuild(e.to_string()))?;
            unit.unit = Some(id);
            return Ok(Joint::from_unit(unit));
        }
        change = next_change;
    }
    Err(AaError::ResponseBuild("commission size did not converge".into()))
}

fn assemble_response_unit(
    trigger: &Trigger,
    outcome: &AaOutcome,
    inputs: &[Input],
    change: u64,
) -> Result<Unit, AaError> {
    let mut outputs: Vec<Output> = outcome
        .payments
        .iter()
        .map(|p| Output {
            address: p.to.clone(),
            amount: p.amount,
            blinding: None,
            output_hash: None,
        })
        .collect();
    if change > 0 {
        outputs.push(Output {
            address: trigger.aa_address.clone(),
            amount: change,
            blinding: None,
            output_hash: None,
        });
    }
    outputs.sort_by(|a, b| (&a.address, a.amount).cmp(&(&b.address, b.amount)));

    let payment = PaymentPayload {
        asset: None,
        denomination: None,
        inputs: inputs.to_vec(),
        outputs,
    };
    let payload_value =
        serde_json::to_value(&payment).map_err(|e| AaError::ResponseBuild(e.to_string()))?;
    let payload_hash =
        payload_hash_b64(&payload_value, true).map_err(|e| AaError::ResponseBuild(e.to_string()))?;

    let mut authentifiers = BTreeMap::new();
    authentifiers.insert("r".to_string(), "autonomous agent".to_string());

    Ok(Unit {
        version: VERSION.into(),
        alt: ALT.into(),
        unit: None,
        parent_units: vec![trigger.unit.clone()],
        last_ball: None,
        last_ball_unit: None,
        witness_list_unit: None,
        witnesses: None,
        // The trigger's own timestamp: committed data, never wall clock.
        timestamp: trigger.timestamp,
        authors: vec![Author {
            address: trigger.aa_address.clone(),
            definition: None,
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
        tps_fee: None,
        content_hash: None,
    })
}
