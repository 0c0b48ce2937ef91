//! Fee accounting: balances settle at stabilization and back-to-back
//! composition accounts for its own in-flight debits.

use crate::fixture::{alice, bob, spawn_network};
use bc_09_tps_fees::{min_tps_fee, InFlightLedger};

#[tokio::test]
async fn composition_declares_only_the_shortfall() {
    let net = spawn_network().await;
    let alice = alice();
    let address = alice.address();
    let store = &net.node.store;

    let last_stable = store.last_stable_mci();
    let required = min_tps_fee(store, last_stable).unwrap();
    assert!(required > 0, "fees are active from genesis");

    // Fresh address, zero balance: the whole fee is declared.
    let first = net
        .composer()
        .compose_payment(&alice, &[(bob().address(), 10)])
        .await
        .unwrap();
    assert_eq!(first.unit.tps_fee, Some(required));

    // The composer's in-flight ledger knows nothing is pending for a
    // fully prepaid unit (declared == required).
    assert_eq!(net.composer().inflight().pending_debit(&address), 0);
}

#[tokio::test]
async fn back_to_back_composition_does_not_double_count_credit() {
    // The race in isolation, with concrete numbers: balance 600,
    // per-unit requirement 500.
    let net = spawn_network().await;
    let store = &net.node.store;
    let address = "RACEADDRESS".to_string();
    let mci = store.last_stable_mci();

    let mut tx = store.begin_tx();
    tx.set_tps_balance(&address, mci, 600).unwrap();
    tx.commit().unwrap();

    let ledger = InFlightLedger::new();
    let required: i64 = 500;

    // First composition: 600 available covers 500; declares nothing and
    // registers the pending 500 debit.
    let available1 = ledger.available_balance(store, &address, mci).unwrap();
    assert_eq!(available1, 600);
    let declared1 = (required - available1).max(0) as u64;
    assert_eq!(declared1, 0);
    ledger.note_composed(&address, &"RACE-U1".to_string(), 500 - declared1);

    // Second composition: only 100 of credit is genuinely left; the
    // shortfall of 400 must be declared.
    let available2 = ledger.available_balance(store, &address, mci).unwrap();
    assert_eq!(available2, 100);
    let declared2 = (required - available2).max(0) as u64;
    assert_eq!(declared2, 400);

    // Combined: debits (500 + 500) are covered by credit 600 plus the
    // declared 400 - and not one unit more.
    assert_eq!(600 + declared1 as i64 + declared2 as i64, 1000);
}

#[tokio::test]
async fn settlement_balances_are_uniform_for_stable_state() {
    let net = spawn_network().await;
    let alice = alice();
    let joint = net
        .composer()
        .compose_payment(&alice, &[(bob().address(), 5)])
        .await
        .unwrap();
    let declared = joint.unit.tps_fee.unwrap();
    let (unit, _) = net.submit(joint).await;
    net.pump_until_stable(&unit).await;

    let props = net.props(&unit);
    let actual = props.actual_tps_fee.expect("settled units record the fee");
    let mci = props.main_chain_index.unwrap();
    let balance = net
        .node
        .store
        .tps_balance_at(&alice.address(), mci)
        .unwrap();
    // The net delta applied at settlement is declared - actual.
    assert_eq!(balance, declared as i64 - actual as i64);

    // The balance lookup is largest-mci-at-or-below: asking later MCIs
    // returns the same entry until the next settlement.
    assert_eq!(
        net.node
            .store
            .tps_balance_at(&alice.address(), mci + 5)
            .unwrap(),
        balance
    );
}
