//! Trigger extraction from stabilized units.

use serde_json::Value;
use shared_types::{Address, Input, MessageBody, Unit, UnitId};
use std::collections::BTreeMap;

/// One invocation of an agent: a stabilized unit paying or messaging it.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// The triggering unit.
    pub unit: UnitId,
    /// The targeted agent.
    pub aa_address: Address,
    /// Address considered the sender (first author of the trigger unit).
    pub trigger_address: Address,
    /// Base-asset amount received, with its output coordinates
    /// (message index, output index, amount).
    pub outputs: Vec<(u32, u32, u64)>,
    /// Attached data message, if any.
    pub data: Option<Value>,
    /// Timestamp of the triggering unit (committed data; response units
    /// reuse it so their ids never depend on a clock).
    pub timestamp: u64,
    /// Whether the trigger was produced by another agent.
    pub is_secondary: bool,
}

impl Trigger {
    /// Total base amount the agent received.
    pub fn total_amount(&self) -> u64 {
        self.outputs.iter().map(|(_, _, amount)| amount).sum()
    }
}

/// Extract the triggers a unit fires, ordered by the first message index
/// paying each agent (agent address breaks ties): the scheduling contract
/// is (MCI, position within MCI, message index), so per-unit firing order
/// follows the messages, not the target addresses. Only base-asset
/// payments trigger; attached `data` messages ride along.
pub fn triggers_of_unit(
    unit_id: &UnitId,
    unit: &Unit,
    is_aa: &dyn Fn(&str) -> bool,
    is_secondary: bool,
) -> Vec<Trigger> {
    let data = unit.messages.iter().find_map(|m| match &m.body {
        MessageBody::Data(value) => Some(value.clone()),
        _ => None,
    });
    let trigger_address = unit.first_author_address().unwrap_or_default().to_string();

    let mut by_target: BTreeMap<Address, Vec<(u32, u32, u64)>> = BTreeMap::new();
    for (msg_index, message) in unit.messages.iter().enumerate() {
        let MessageBody::Payment(payment) = &message.body else {
            continue;
        };
        if payment.asset.is_some() {
            continue;
        }
        // Self-payments of an agent are change, not triggers.
        let from_aa = payment.inputs.iter().all(|i| matches!(i, Input::Transfer { .. }))
            && is_aa(&trigger_address);
        for (out_index, output) in payment.outputs.iter().enumerate() {
            if output.address == trigger_address && from_aa {
                continue;
            }
            if is_aa(&output.address) {
                by_target.entry(output.address.clone()).or_default().push((
                    msg_index as u32,
                    out_index as u32,
                    output.amount,
                ));
            }
        }
    }

    let mut triggers: Vec<Trigger> = by_target
        .into_iter()
        .map(|(aa_address, outputs)| Trigger {
            unit: unit_id.clone(),
            aa_address,
            trigger_address: trigger_address.clone(),
            outputs,
            data: data.clone(),
            timestamp: unit.timestamp,
            is_secondary,
        })
        .collect();
    // Outputs were collected in message order, so the first entry's
    // message index is each trigger's earliest mention.
    triggers.sort_by(|a, b| {
        let a_key = (a.outputs.first().map(|(m, _, _)| *m), &a.aa_address);
        let b_key = (b.outputs.first().map(|(m, _, _)| *m), &b.aa_address);
        a_key.cmp(&b_key)
    });
    triggers
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Author, Message, Output, PayloadLocation, PaymentPayload};

    fn payment_message(outputs: Vec<(&str, u64)>) -> Message {
        Message {
            body: MessageBody::Payment(PaymentPayload {
                asset: None,
                denomination: None,
                inputs: vec![Input::Issue {
                    amount: 1,
                    serial_number: 1,
                    address: None,
                }],
                outputs: outputs
                    .into_iter()
                    .map(|(address, amount)| Output {
                        address: address.into(),
                        amount,
                        blinding: None,
                        output_hash: None,
                    })
                    .collect(),
            }),
            payload_location: PayloadLocation::Inline,
            payload_hash: "H".into(),
        }
    }

    fn unit_with_messages(messages: Vec<Message>) -> Unit {
        Unit {
            version: "4.0".into(),
            alt: "1".into(),
            unit: Some("U".into()),
            parent_units: vec![],
            last_ball: None,
            last_ball_unit: None,
            witness_list_unit: None,
            witnesses: None,
            timestamp: 1,
            authors: vec![Author {
                address: "SENDER".into(),
                definition: None,
                authentifiers: BTreeMap::new(),
            }],
            messages,
            earned_headers_commission_recipients: None,
            headers_commission: 0,
            payload_commission: 0,
            tps_fee: None,
            content_hash: None,
        }
    }

    #[test]
    fn triggers_follow_message_order_not_address_order() {
        // Message 0 pays agent "Z...", message 1 pays agent "A...": the
        // "Z..." handler fires first despite sorting last by address.
        let unit = unit_with_messages(vec![
            payment_message(vec![("ZAGENT", 100)]),
            payment_message(vec![("AAGENT", 100)]),
        ]);
        let is_aa = |address: &str| address == "ZAGENT" || address == "AAGENT";
        let triggers = triggers_of_unit(&"U".to_string(), &unit, &is_aa, false);
        let order: Vec<&str> = triggers.iter().map(|t| t.aa_address.as_str()).collect();
        assert_eq!(order, vec!["ZAGENT", "AAGENT"]);
    }

    #[test]
    fn same_message_targets_tiebreak_by_address() {
        let unit = unit_with_messages(vec![payment_message(vec![
            ("ZAGENT", 50),
            ("AAGENT", 50),
        ])]);
        let is_aa = |address: &str| address == "ZAGENT" || address == "AAGENT";
        let triggers = triggers_of_unit(&"U".to_string(), &unit, &is_aa, false);
        let order: Vec<&str> = triggers.iter().map(|t| t.aa_address.as_str()).collect();
        assert_eq!(order, vec!["AAGENT", "ZAGENT"]);
    }

    #[test]
    fn multi_message_trigger_keeps_its_earliest_position() {
        // "ZAGENT" is first mentioned in message 0, "AAGENT" only in
        // message 1; a second payment to "ZAGENT" in message 2 does not
        // move it back.
        let unit = unit_with_messages(vec![
            payment_message(vec![("ZAGENT", 10)]),
            payment_message(vec![("AAGENT", 10)]),
            payment_message(vec![("ZAGENT", 10)]),
        ]);
        let is_aa = |address: &str| address == "ZAGENT" || address == "AAGENT";
        let triggers = triggers_of_unit(&"U".to_string(), &unit, &is_aa, false);
        let order: Vec<&str> = triggers.iter().map(|t| t.aa_address.as_str()).collect();
        assert_eq!(order, vec!["ZAGENT", "AAGENT"]);
        assert_eq!(triggers[0].outputs.len(), 2);
    }
}
