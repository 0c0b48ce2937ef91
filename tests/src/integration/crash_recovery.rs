//! Crash recovery: a kill between the KV sync and the row commit leaves a
//! marker and an orphan KV body; startup recovery removes both and the
//! unit becomes indistinguishable from never-received.

use crate::fixture::{alice, bob, spawn_network};
use bc_02_object_store::keys;
use bc_07_writer::run_startup_recovery;

#[tokio::test]
async fn torn_save_is_repaired_and_unit_resubmittable() {
    let net = spawn_network().await;
    let alice = alice();

    // A fully composed, valid joint the node has NOT saved.
    let joint = net
        .composer()
        .compose_payment(&alice, &[(bob().address(), 42)])
        .await
        .unwrap();
    let unit = joint.unit.unit.clone().unwrap();
    let store = &net.node.store;

    // Reproduce the torn write exactly as the writer would leave it at a
    // kill point: durable marker, synced KV body, no row commit.
    store.set_inflight_unit(&unit).unwrap();
    let mut kv = store.kv_batch();
    kv.put(
        keys::kv_joint(&unit),
        serde_json::to_vec(&joint).unwrap(),
    )
    .unwrap();
    kv.write(true).unwrap();
    assert!(store.kv_joint_exists(&unit).unwrap());
    assert!(store.unit_row(&unit).unwrap().is_none());

    // Startup repair.
    let report = run_startup_recovery(store).unwrap();
    assert_eq!(report.removed_orphan, Some(unit.clone()));
    assert!(!store.kv_joint_exists(&unit).unwrap());
    assert_eq!(store.inflight_unit().unwrap(), None);
    assert!(!store.is_known_unit(&unit).unwrap());

    // Indistinguishable from never-received: the same joint now saves
    // normally.
    let (saved, _) = net.submit(joint).await;
    assert_eq!(saved, unit);
    assert!(store.kv_joint_exists(&unit).unwrap());
    assert!(store.unit_row(&unit).unwrap().is_some());
}

#[tokio::test]
async fn save_failure_rebuilds_caches_from_disk() {
    let net = spawn_network().await;
    let store = &net.node.store;
    let stats_before = store.cache_stats();

    // A reset must reproduce exactly the disk-derived view.
    store.reset_memory().unwrap();
    let stats_after = store.cache_stats();
    assert_eq!(stats_before.unstable, stats_after.unstable);

    // Eviction safety: shrinking never drops a unit with pending
    // unstable message references, and re-reading after a shrink still
    // serves every unstable unit.
    net.pump(5).await;
    store.shrink_cache();
    for props in store.unstable_units_cached() {
        assert!(store.unit_props(&props.unit).unwrap().is_some());
    }
}
