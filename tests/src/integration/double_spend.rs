//! Double-spend tie-break: two units spending the same output are both
//! accepted, both lose their serial claims, and stabilization leaves
//! exactly one good and one final-bad with its content replaced.

use crate::fixture::{alice, bob, carol, spawn_network};
use shared_types::{MessageBody, Sequence};

#[tokio::test]
async fn conflicting_spends_resolve_to_one_winner() {
    let net = spawn_network().await;
    let alice = alice();

    // Compose both BEFORE saving either, so they select the same outputs.
    let to_bob = net
        .composer()
        .compose_payment(&alice, &[(bob().address(), 100)])
        .await
        .unwrap();
    let to_carol = net
        .composer()
        .compose_payment(&alice, &[(carol().address(), 100)])
        .await
        .unwrap();
    let src = {
        let MessageBody::Payment(p) = &to_bob.unit.messages[0].body else {
            panic!()
        };
        p.inputs[0].source().map(|(u, m, o)| (u.to_string(), m, o)).unwrap()
    };

    let (u_bob, _) = net.submit(to_bob).await;
    let (u_carol, _) = net.submit(to_carol).await;
    assert_ne!(u_bob, u_carol);

    // Both accepted; the conflict set is temp-bad and the serial claim on
    // the contested output is gone.
    assert_eq!(net.props(&u_bob).sequence, Sequence::TempBad);
    assert_eq!(net.props(&u_carol).sequence, Sequence::TempBad);
    assert_eq!(
        net.node
            .store
            .serial_spender_of(&src.0, src.1, src.2)
            .unwrap(),
        None
    );
    let spenders = net.node.store.spenders_of(&src.0, src.1, src.2).unwrap();
    assert!(spenders.contains(&u_bob) && spenders.contains(&u_carol));

    net.pump_until_stable(&u_bob).await;
    net.pump_until_stable(&u_carol).await;

    let bob_props = net.props(&u_bob);
    let carol_props = net.props(&u_carol);
    let winners = [&bob_props, &carol_props]
        .iter()
        .filter(|p| p.sequence == Sequence::Good)
        .count();
    assert_eq!(winners, 1, "exactly one side of the tie wins");

    let (winner, loser) = if bob_props.sequence == Sequence::Good {
        (&bob_props, &carol_props)
    } else {
        (&carol_props, &bob_props)
    };
    assert_eq!(loser.sequence, Sequence::FinalBad);

    // The tie-break rule: the winner's inclusion MCI is lowest; on equal
    // MCI the lexicographically smaller id wins.
    if winner.main_chain_index == loser.main_chain_index {
        assert!(winner.unit < loser.unit);
    } else {
        assert!(winner.main_chain_index < loser.main_chain_index);
    }

    // The loser's content is replaced by its hash; the id survives.
    let voided = net.node.store.joint(&loser.unit).unwrap().unwrap();
    assert!(voided.unit.content_hash.is_some());
    assert!(voided.unit.messages.is_empty());
    assert_eq!(voided.unit.unit.as_deref(), Some(loser.unit.as_str()));

    // Only the winner's recipient got paid.
    let bob_won = winner.unit == u_bob;
    assert_eq!(net.balance_of(&bob().address()), if bob_won { 100 } else { 0 });
    assert_eq!(
        net.balance_of(&carol().address()),
        if bob_won { 0 } else { 100 }
    );
}

#[tokio::test]
async fn spending_a_stably_spent_output_is_rejected() {
    let net = spawn_network().await;
    let alice = alice();

    let first = net
        .composer()
        .compose_payment(&alice, &[(bob().address(), 50)])
        .await
        .unwrap();
    let src = {
        let MessageBody::Payment(p) = &first.unit.messages[0].body else {
            panic!()
        };
        p.inputs[0].source().map(|(u, m, o)| (u.to_string(), m, o)).unwrap()
    };
    let (u_first, _) = net.submit(first).await;
    net.pump_until_stable(&u_first).await;

    // The source output is now stably spent.
    let output = net.node.store.output(&src.0, src.1, src.2).unwrap().unwrap();
    assert!(output.is_spent);
}
