//! Autonomous agents end-to-end: deploy, trigger, deterministic response
//! saved under the same stabilization, state vars updated atomically.

use crate::fixture::{alice, bob, message_of, spawn_network};
use bc_02_object_store::keys;
use serde_json::json;
use shared_types::{AaDefinitionPayload, MessageBody, Sequence};

#[tokio::test]
async fn trigger_runs_handler_and_saves_response() {
    let net = spawn_network().await;
    let alice = alice();
    let bob_address = bob().address();

    // Deploy a counter+forwarder agent.
    let definition = json!(["autonomous agent", {
        "counter_var": "triggers_seen",
        "forward_to": bob_address,
    }]);
    let aa_address = bc_01_hashing::address_from_definition(&definition);
    let deploy = net
        .craft_payment(
            &alice.address(),
            None,
            &alice,
            &[],
            vec![MessageBody::Definition(AaDefinitionPayload {
                address: aa_address.clone(),
                definition: definition.clone(),
            })],
        )
        .await;
    let (deploy_unit, _) = net.submit(deploy).await;
    net.pump_until_stable(&deploy_unit).await;
    assert!(
        net.node.store.aa_row(&aa_address).unwrap().is_some(),
        "deployment lands at stabilization"
    );

    // Trigger it with a payment.
    let trigger = net
        .composer()
        .compose_payment(&alice, &[(aa_address.clone(), 50_000)])
        .await
        .unwrap();
    let (trigger_unit, _) = net.submit(trigger).await;
    net.pump_until_stable(&trigger_unit).await;

    // The response row exists, not bounced, and names a response unit.
    let response = net
        .node
        .store
        .rows_scan_bounded(&keys::aa_response(&trigger_unit), 1)
        .unwrap();
    assert_eq!(response.len(), 1);
    let row: bc_02_object_store::AaResponseRow =
        bincode::deserialize(&response[0].1).unwrap();
    assert!(!row.bounced);
    let response_unit = row.response_unit.expect("forwarder responds with a unit");

    // The response unit is saved and pays Bob the amount minus the flat
    // forwarding fee and commissions.
    let saved = net.node.store.joint(&response_unit).unwrap().unwrap();
    assert_eq!(saved.unit.author_addresses(), vec![aa_address.as_str()]);
    let MessageBody::Payment(payment) = &saved.unit.messages[0].body else {
        panic!("response carries a payment");
    };
    let to_bob: u64 = payment
        .outputs
        .iter()
        .filter(|o| o.address == bob_address)
        .map(|o| o.amount)
        .sum();
    assert!(to_bob > 0 && to_bob <= 49_000);

    // State mutated atomically with the stabilization.
    let counter = net
        .node
        .store
        .aa_state_var(&aa_address, "triggers_seen")
        .unwrap()
        .expect("counter var set");
    assert_eq!(counter, json!(1));

    // Determinism: the response id is a pure function of trigger and
    // state; the recorded id matches a recomputed one.
    assert_eq!(saved.unit.unit.as_deref(), Some(response_unit.as_str()));
}

#[tokio::test]
async fn underfunded_trigger_bounces_without_state_change() {
    let net = spawn_network().await;
    let alice = alice();

    let definition = json!(["autonomous agent", {
        "counter_var": "bounce_counter",
        "forward_to": bob().address(),
    }]);
    let aa_address = bc_01_hashing::address_from_definition(&definition);
    let deploy = net
        .craft_payment(
            &alice.address(),
            None,
            &alice,
            &[],
            vec![MessageBody::Definition(AaDefinitionPayload {
                address: aa_address.clone(),
                definition,
            })],
        )
        .await;
    let (deploy_unit, _) = net.submit(deploy).await;
    net.pump_until_stable(&deploy_unit).await;

    // Below the forwarding fee: the handler bounces.
    let trigger = net
        .composer()
        .compose_payment(&alice, &[(aa_address.clone(), 500)])
        .await
        .unwrap();
    let (trigger_unit, _) = net.submit(trigger).await;
    net.pump_until_stable(&trigger_unit).await;
    assert_eq!(net.props(&trigger_unit).sequence, Sequence::Good);

    let response = net
        .node
        .store
        .rows_scan_bounded(&keys::aa_response(&trigger_unit), 1)
        .unwrap();
    let row: bc_02_object_store::AaResponseRow =
        bincode::deserialize(&response[0].1).unwrap();
    assert!(row.bounced);
    assert_eq!(row.response_unit, None);
    assert_eq!(
        net.node
            .store
            .aa_state_var(&aa_address, "bounce_counter")
            .unwrap(),
        None,
        "bounced triggers leave no state behind"
    );
}
