//! Genesis bootstrap and a simple payment: the network starts, Alice pays
//! Bob, the payment stabilizes, and every conservation rule holds.

use crate::fixture::{alice, bob, spawn_network, ALICE_GRANT};
use shared_types::{MessageBody, Sequence};

#[tokio::test]
async fn genesis_stabilizes_and_seeds_balances() {
    let net = spawn_network().await;
    let genesis = net.props(&net.genesis_unit);
    assert!(genesis.is_stable);
    assert!(genesis.is_on_main_chain);
    assert_eq!(genesis.main_chain_index, Some(0));
    assert_eq!(genesis.sequence, Sequence::Good);
    assert_eq!(
        net.node.store.ball_of_unit(&net.genesis_unit).unwrap().is_some(),
        true,
        "genesis gets a ball at stabilization"
    );
    assert_eq!(net.balance_of(&alice().address()), ALICE_GRANT);
    assert_eq!(net.balance_of(&bob().address()), 0);
}

#[tokio::test]
async fn alice_pays_bob_and_the_payment_stabilizes() {
    let net = spawn_network().await;
    let alice = alice();
    let bob_address = bob().address();

    let joint = net
        .composer()
        .compose_payment(&alice, &[(bob_address.clone(), 100)])
        .await
        .unwrap();
    let unit = joint.unit.clone();
    let (unit_id, _) = net.submit(joint).await;

    // Conservation: inputs = outputs + all declared fees.
    let MessageBody::Payment(payment) = &unit.messages[0].body else {
        panic!("composed unit carries a payment");
    };
    let mut total_in = 0u64;
    for input in &payment.inputs {
        let (src, msg, out) = input.source().expect("transfer inputs only");
        total_in += net.node.store.output(src, msg, out).unwrap().unwrap().amount;
    }
    assert_eq!(
        total_in,
        payment.total_output().unwrap() + unit.total_commissions()
    );

    net.pump_until_stable(&unit_id).await;
    let props = net.props(&unit_id);
    assert!(props.is_stable);
    assert_eq!(props.sequence, Sequence::Good);

    assert_eq!(net.balance_of(&bob_address), 100);
    assert_eq!(
        net.balance_of(&alice.address()),
        ALICE_GRANT - 100 - unit.total_commissions()
    );
}

#[tokio::test]
async fn stability_is_monotonic_under_pumping() {
    let net = spawn_network().await;
    let mut last_stable = net.node.store.last_stable_mci();
    for round in 0..20 {
        net.pump_one(round).await;
        let current = net.node.store.last_stable_mci();
        assert!(current >= last_stable, "last_stable_mci never decreases");
        last_stable = current;
    }
    assert!(last_stable > 0, "witnessing advances stability");

    // Spot-check: every stable MC unit keeps is_stable once set.
    for mci in 0..=last_stable {
        let unit = net.node.store.mc_unit_at(mci).unwrap().expect("mc unit");
        assert!(net.props(&unit).is_stable);
    }
}
