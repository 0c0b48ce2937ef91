//! Key rotation: after an address-definition change stabilizes, units
//! signed with the old key are rejected and units signed with the new key
//! (revealing the new definition) are accepted.

use crate::fixture::{alice, alice_next, bob, spawn_network};
use node_runtime::IntakeOutcome;
use shared_types::{AddressDefinitionChangePayload, MessageBody, ValidationError};

#[tokio::test]
async fn rotation_switches_the_accepted_key() {
    let net = spawn_network().await;
    let alice_key = alice();
    let next_key = alice_next();
    let address = alice_key.address();
    let next_chash = bc_01_hashing::address_from_definition(&next_key.definition());

    // Rotate: a change message signed with the CURRENT key.
    let rotation = net
        .craft_payment(
            &address,
            None,
            &alice_key,
            &[],
            vec![MessageBody::AddressDefinitionChange(
                AddressDefinitionChangePayload {
                    address: None,
                    definition_chash: next_chash.clone(),
                },
            )],
        )
        .await;
    let (rotation_unit, _) = net.submit(rotation).await;
    net.pump_until_stable(&rotation_unit).await;
    assert_eq!(
        net.node
            .store
            .definition_chash_at(&address, net.node.store.last_stable_mci())
            .unwrap(),
        next_chash,
        "the governing chash switched"
    );

    // Old key, old definition: the inline definition no longer hashes to
    // the governing chash.
    let stale = net
        .craft_payment(
            &address,
            Some(alice_key.definition()),
            &alice_key,
            &[(bob().address(), 10)],
            vec![],
        )
        .await;
    match net.submit_raw(stale).await {
        IntakeOutcome::Rejected {
            error: ValidationError::Unit(reason),
            ..
        } => assert!(
            reason.contains("definition") || reason.contains("verification"),
            "unexpected reason: {reason}"
        ),
        other => panic!("stale-key unit must be rejected, got {other:?}"),
    }

    // Old key signing under the NEW definition: hash matches, signature
    // does not.
    let forged = net
        .craft_payment(
            &address,
            Some(next_key.definition()),
            &alice_key,
            &[(bob().address(), 10)],
            vec![],
        )
        .await;
    match net.submit_raw(forged).await {
        IntakeOutcome::Rejected {
            error: ValidationError::Unit(reason),
            ..
        } => assert!(
            reason.contains("verification failed"),
            "unexpected reason: {reason}"
        ),
        other => panic!("forged unit must be rejected, got {other:?}"),
    }

    // New key, new definition revealed inline: accepted and stabilizes.
    let fresh = net
        .craft_payment(
            &address,
            Some(next_key.definition()),
            &next_key,
            &[(bob().address(), 10)],
            vec![],
        )
        .await;
    let (fresh_unit, _) = net.submit(fresh).await;
    net.pump_until_stable(&fresh_unit).await;
    assert_eq!(
        net.props(&fresh_unit).sequence,
        shared_types::Sequence::Good
    );
    assert_eq!(net.balance_of(&bob().address()), 10);
}
