//! Cross-node determinism: two nodes fed the same joints in different
//! orders converge to identical (MCI, ball) assignments, identical
//! sequences and identical fee balances.

use crate::fixture::{alice, bob, carol, spawn_network, TestNet};
use bc_01_hashing::{canonical_bytes, unit_id};
use serde_json::json;
use shared_types::Joint;

/// Collect every joint the source node knows, as (unit, joint) pairs in
/// save order approximated by level.
async fn all_joints(net: &TestNet) -> Vec<Joint> {
    let mut units: Vec<(u64, String)> = Vec::new();
    let last_stable = net.node.store.last_stable_mci();
    for mci in 0..=last_stable {
        for unit in net.node.store.stable_units_at(mci).unwrap() {
            units.push((net.props(&unit).level, unit));
        }
    }
    for props in net.node.store.unstable_units_cached() {
        units.push((props.level, props.unit));
    }
    units.sort();
    units.dedup();
    let mut joints = Vec::new();
    for (_, unit) in units {
        joints.push(net.node.store.joint(&unit).unwrap().unwrap());
    }
    joints
}

#[tokio::test]
async fn two_nodes_converge_regardless_of_arrival_order() {
    // Node A builds history organically.
    let node_a = spawn_network().await;
    let a_pay = node_a
        .composer()
        .compose_payment(&alice(), &[(bob().address(), 100)])
        .await
        .unwrap();
    node_a.submit(a_pay).await;
    node_a.pump(12).await;

    let joints = all_joints(&node_a).await;
    assert!(joints.len() > 10);

    // Node B receives the same joints in a scrambled order; missing
    // parents park and the dependency fan-out replays them. It first
    // records node A's catchup skeleton, as a syncing peer would.
    let node_b = spawn_network().await;
    let skeleton = node_a.node.light.get_catchup_balls(0, 1000).unwrap();
    assert!(!skeleton.is_empty());
    let entries: Vec<(String, String)> = skeleton
        .iter()
        .map(|b| (b.ball.clone(), b.unit.clone()))
        .collect();
    node_b.node.writer.record_hash_tree_balls(&entries).await.unwrap();
    let mut scrambled: Vec<Joint> = joints.clone();
    scrambled.reverse();
    // Genesis first (node B refuses everything before its params anchor),
    // everything else reversed.
    scrambled.sort_by_key(|j| !j.unit.parent_units.is_empty() as u8);
    for joint in scrambled {
        let _ = node_b.submit_raw(joint).await;
    }
    // Retry passes replay transient parkings (last-ball races) until the
    // backlog drains.
    for _ in 0..20 {
        if node_b.intake().retry_unhandled(crate::fixture::now()).await == 0 {
            break;
        }
    }

    // Every unit node B managed to settle must agree with node A.
    let last_stable_b = node_b.node.store.last_stable_mci();
    assert!(last_stable_b > 0, "node B made stability progress");
    for mci in 0..=last_stable_b {
        let unit_a = node_a.node.store.mc_unit_at(mci).unwrap();
        let unit_b = node_b.node.store.mc_unit_at(mci).unwrap();
        assert_eq!(unit_a, unit_b, "main chain diverged at mci {mci}");
        let unit = unit_b.unwrap();
        assert_eq!(
            node_a.node.store.ball_of_unit(&unit).unwrap(),
            node_b.node.store.ball_of_unit(&unit).unwrap(),
            "ball diverged at mci {mci}"
        );
        assert_eq!(
            node_a.props(&unit).sequence,
            node_b.props(&unit).sequence,
            "sequence diverged at mci {mci}"
        );
    }

    // Fee balances agree for every address at node B's stable point.
    for signer in [alice(), bob(), carol()] {
        let address = signer.address();
        assert_eq!(
            node_a
                .node
                .store
                .tps_balance_at(&address, last_stable_b)
                .unwrap(),
            node_b
                .node
                .store
                .tps_balance_at(&address, last_stable_b)
                .unwrap(),
            "fee balance diverged for {address}"
        );
    }
}

#[tokio::test]
async fn canonical_encoding_is_stable_for_stored_joints() {
    let net = spawn_network().await;
    net.pump(3).await;
    for props in net.node.store.unstable_units_cached() {
        let joint = net.node.store.joint(&props.unit).unwrap().unwrap();
        // Round-trip: decode(encode(joint)) == joint, id unchanged.
        let text = serde_json::to_string(&joint).unwrap();
        let back: Joint = serde_json::from_str(&text).unwrap();
        assert_eq!(back, joint);
        assert_eq!(unit_id(&back.unit).unwrap(), props.unit);
    }

    // Canonical bytes are input-order independent for maps.
    let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
    let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
    assert_eq!(
        canonical_bytes(&a, true).unwrap(),
        canonical_bytes(&b, true).unwrap()
    );
}
