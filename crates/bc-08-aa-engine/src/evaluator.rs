//! # Evaluator Contract
//!
//! The engine treats handler evaluation as an external deterministic
//! function: same definition, same trigger, same state view → same
//! outcome, on every node, forever. The trait is object-safe so nodes
//! can plug richer script engines without touching the sequencer.

use crate::errors::AaError;
use crate::state_view::StateView;
use crate::trigger::Trigger;
use serde_json::Value;
use shared_types::Address;

/// One state variable write (None deletes).
pub type StateMutation = (String, Option<Value>);

/// A payment the handler wants to make.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseIntent {
    /// Recipient.
    pub to: Address,
    /// Base-asset amount before fees.
    pub amount: u64,
}

/// Everything a handler run produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AaOutcome {
    /// Payments to make from the agent's received funds.
    pub payments: Vec<ResponseIntent>,
    /// State writes, applied atomically with the stabilization.
    pub mutations: Vec<StateMutation>,
    /// Whether the handler bounced (funds return, no state change).
    pub bounced: bool,
    /// Free-form response metadata recorded with the response row.
    pub response: Value,
}

/// Deterministic handler evaluation.
pub trait AaEvaluator: Send + Sync {
    /// Run the agent's definition against a trigger and a state snapshot.
    /// MUST NOT depend on wall clock, randomness or host details.
    fn evaluate(
        &self,
        definition_json: &str,
        trigger: &Trigger,
        state: &StateView,
    ) -> Result<AaOutcome, AaError>;
}

/// Reference evaluator used by tests and simple deployments. Supports
/// two template parameters inside `["autonomous agent", {...}]`:
///
/// - `"counter_var": "<name>"` - increments the named state variable on
///   every trigger.
/// - `"forward_to": "<address>"` - forwards the received amount minus
///   [`BasicAaEvaluator::FORWARD_FEE`]; bounces triggers too small to
///   cover the fee.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicAaEvaluator;

impl BasicAaEvaluator {
    /// Flat fee kept back by forwarding agents.
    pub const FORWARD_FEE: u64 = 1000;
}

impl AaEvaluator for BasicAaEvaluator {
    fn evaluate(
        &self,
        definition_json: &str,
        trigger: &Trigger,
        state: &StateView,
    ) -> Result<AaOutcome, AaError> {
        let definition: Value =
            serde_json::from_str(definition_json).map_err(|e| AaError::BadDefinition {
                address: trigger.aa_address.clone(),
                detail: e.to_string(),
            })?;
        let params = definition
            .get(1)
            .and_then(Value::as_object)
            .ok_or_else(|| AaError::BadDefinition {
                address: trigger.aa_address.clone(),
                detail: "expected [\"autonomous agent\", {params}]".into(),
            })?;

        let mut outcome = AaOutcome::default();

        if let Some(var) = params.get("counter_var").and_then(Value::as_str) {
            let current = state
                .get(var)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            outcome
                .mutations
                .push((var.to_string(), Some(Value::from(current + 1))));
            outcome.response = serde_json::json!({ "counter": current + 1 });
        }

        if let Some(to) = params.get("forward_to").and_then(Value::as_str) {
            let received = trigger.total_amount();
            if received <= Self::FORWARD_FEE {
                return Ok(AaOutcome {
                    bounced: true,
                    response: serde_json::json!({
                        "error": "amount does not cover the forwarding fee"
                    }),
                    ..AaOutcome::default()
                });
            }
            outcome.payments.push(ResponseIntent {
                to: to.to_string(),
                amount: received - Self::FORWARD_FEE,
            });
            outcome.response = serde_json::json!({ "forwarded": received - Self::FORWARD_FEE });
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(amount: u64) -> Trigger {
        Trigger {
            unit: "T".into(),
            aa_address: "AGENT".into(),
            trigger_address: "SENDER".into(),
            outputs: vec![(0, 0, amount)],
            data: None,
            timestamp: 1_700_000_000,
            is_secondary: false,
        }
    }

    #[test]
    fn counter_increments_from_state() {
        let eval = BasicAaEvaluator;
        let def = r#"["autonomous agent", {"counter_var": "count"}]"#;
        let out = eval.evaluate(def, &trigger(5000), &StateView::default()).unwrap();
        assert_eq!(
            out.mutations,
            vec![("count".to_string(), Some(serde_json::json!(1)))]
        );
        assert!(!out.bounced);
    }

    #[test]
    fn forwarder_pays_amount_minus_fee() {
        let eval = BasicAaEvaluator;
        let def = r#"["autonomous agent", {"forward_to": "DEST"}]"#;
        let out = eval.evaluate(def, &trigger(5000), &StateView::default()).unwrap();
        assert_eq!(
            out.payments,
            vec![ResponseIntent {
                to: "DEST".into(),
                amount: 4000
            }]
        );
    }

    #[test]
    fn underfunded_forward_bounces() {
        let eval = BasicAaEvaluator;
        let def = r#"["autonomous agent", {"forward_to": "DEST"}]"#;
        let out = eval.evaluate(def, &trigger(500), &StateView::default()).unwrap();
        assert!(out.bounced);
        assert!(out.payments.is_empty());
    }

    #[test]
    fn same_inputs_same_outcome() {
        let eval = BasicAaEvaluator;
        let def = r#"["autonomous agent", {"counter_var": "n", "forward_to": "DEST"}]"#;
        let a = eval.evaluate(def, &trigger(9000), &StateView::default()).unwrap();
        let b = eval.evaluate(def, &trigger(9000), &StateView::default()).unwrap();
        assert_eq!(a, b);
    }
}
