//! # Row-Store Transactions
//!
//! A [`StoreTx`] stages typed mutations and applies them as one atomic
//! batch at commit. Reads through the transaction see staged writes
//! (read-your-writes), which the stabilizer relies on when it recomputes
//! props it updated earlier in the same transaction.
//!
//! The serial-spend uniqueness constraint is enforced at stage time: a
//! serial input claims its source via the `spu` key, and a second claim -
//! staged or committed - fails the insert. Conflict inputs are staged with
//! `is_unique = None` and never touch the constraint key.

use crate::errors::StoreError;
use crate::keys;
use crate::kv::KvOp;
use crate::rows::{
    AaResponseRow, AaRow, AaTriggerRow, AssetRow, AuthorRow, DefinitionRow, InputKind, InputRow,
    KnownBadRow, OutputRow, SystemVarRow, SystemVoteRow, UnhandledRow, UnitRow,
};
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{Address, BallId, SystemSubject, UnitId, UnitProps};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A staged row-store transaction.
pub struct StoreTx<'a> {
    store: &'a Store,
    ops: Vec<KvOp>,
    view: HashMap<Vec<u8>, Option<Vec<u8>>>,
    staged_last_stable_mci: Option<u64>,
    committed: bool,
}

impl<'a> StoreTx<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self {
            store,
            ops: Vec::new(),
            view: HashMap::new(),
            staged_last_stable_mci: None,
            committed: false,
        }
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    // -----------------------------------------------------------------------
    // Raw staging
    // -----------------------------------------------------------------------

    fn put_bincode<T: Serialize>(&mut self, key: Vec<u8>, row: &T) -> Result<(), StoreError> {
        let bytes = bincode::serialize(row).map_err(|e| StoreError::Engine(e.to_string()))?;
        self.put_raw(key, bytes);
        Ok(())
    }

    fn put_raw(&mut self, key: Vec<u8>, bytes: Vec<u8>) {
        self.view.insert(key.clone(), Some(bytes.clone()));
        self.ops.push(KvOp::Put(key, bytes));
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.view.insert(key.clone(), None);
        self.ops.push(KvOp::Delete(key));
    }

    /// Read a typed row through the staged view.
    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        if let Some(staged) = self.view.get(key) {
            return match staged {
                Some(bytes) => Ok(Some(Store::decode(key, bytes)?)),
                None => Ok(None),
            };
        }
        match self.store.rows_get_raw(key)? {
            Some(bytes) => Ok(Some(Store::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a key exists in the staged view.
    pub fn exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        if let Some(staged) = self.view.get(key) {
            return Ok(staged.is_some());
        }
        self.store.rows_exists(key)
    }

    /// Raw bytes of a key through the staged view (for the string-valued
    /// index rows: main-chain units, balls, serial claims).
    pub fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(staged) = self.view.get(key) {
            return Ok(staged.clone());
        }
        self.store.rows_get_raw(key)
    }

    /// TPS fee balance effective at `mci` through the staged view, so
    /// settlement of several units at one MCI compounds instead of
    /// overwriting.
    pub fn tps_balance_at(&self, address: &str, mci: u64) -> Result<i64, StoreError> {
        let mut balance = 0i64;
        for (key, value) in self.scan(&keys::tps_balance_history(address), 100_000)? {
            let parts = keys::parts(&key);
            let Some(entry_mci) = parts.get(2).and_then(|p| p.parse::<u64>().ok()) else {
                continue;
            };
            if entry_mci > mci {
                break;
            }
            balance = Store::decode(&key, &value)?;
        }
        Ok(balance)
    }

    /// Bounded prefix scan merging committed rows with the stage.
    pub fn scan(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .store
            .rows_scan(prefix, limit)?
            .into_iter()
            .collect();
        for (key, staged) in &self.view {
            if key.starts_with(prefix) {
                match staged {
                    Some(bytes) => {
                        merged.insert(key.clone(), bytes.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }
        Ok(merged.into_iter().take(limit).collect())
    }

    // -----------------------------------------------------------------------
    // Units & graph
    // -----------------------------------------------------------------------

    /// Insert a unit row with its graph bookkeeping: the unstable index,
    /// the free index, child edges, and parents losing their tip status.
    pub fn insert_unit(&mut self, row: &UnitRow) -> Result<(), StoreError> {
        let unit = &row.props.unit;
        self.put_bincode(keys::unit(unit), row)?;
        self.put_raw(keys::unstable(unit), Vec::new());
        self.put_raw(keys::free(unit), Vec::new());
        for parent in &row.props.parent_units {
            self.put_raw(keys::child(parent, unit), Vec::new());
            self.delete(keys::free(parent));
            // Parents are no longer free.
            if let Some(mut parent_row) = self.get::<UnitRow>(&keys::unit(parent))? {
                if parent_row.props.is_free {
                    parent_row.props.is_free = false;
                    self.put_bincode(keys::unit(parent), &parent_row)?;
                }
            }
        }
        Ok(())
    }

    /// Unit props through the staged view.
    pub fn unit_props(&self, unit: &str) -> Result<Option<UnitProps>, StoreError> {
        Ok(self.get::<UnitRow>(&keys::unit(unit))?.map(|r| r.props))
    }

    /// Replace a whole unit row (props and message-ref counter).
    pub fn update_unit_row(&mut self, row: &UnitRow) -> Result<(), StoreError> {
        self.put_bincode(keys::unit(&row.props.unit), row)
    }

    /// Replace a unit's props, preserving its message-ref counter.
    pub fn update_props(&mut self, props: &UnitProps) -> Result<(), StoreError> {
        let key = keys::unit(&props.unit);
        let mut row = self
            .get::<UnitRow>(&key)?
            .ok_or_else(|| StoreError::Missing(format!("unit {}", props.unit)))?;
        row.props = props.clone();
        self.put_bincode(key, &row)
    }

    /// Mark a unit stable: flips props, maintains the unstable index and
    /// the stable-by-MCI grouping.
    pub fn mark_stable(&mut self, props: &UnitProps) -> Result<(), StoreError> {
        debug_assert!(props.is_stable);
        self.update_props(props)?;
        self.delete(keys::unstable(&props.unit));
        if let Some(mci) = props.main_chain_index {
            self.put_raw(keys::stable_by_mci(mci, &props.unit), Vec::new());
        }
        Ok(())
    }

    /// Record the main-chain unit of an MCI.
    pub fn set_mc_unit(&mut self, mci: u64, unit: &UnitId) {
        self.put_raw(keys::mc_unit(mci), unit.as_bytes().to_vec());
    }

    /// Remove a retreating main-chain assignment.
    pub fn clear_mc_unit(&mut self, mci: u64) {
        self.delete(keys::mc_unit(mci));
    }

    /// Assign a ball to a stabilized unit (both directions).
    pub fn set_ball(&mut self, unit: &UnitId, ball: &BallId) {
        self.put_raw(keys::ball_of_unit(unit), ball.as_bytes().to_vec());
        self.put_raw(keys::unit_of_ball(ball), unit.as_bytes().to_vec());
    }

    /// Record a catchup hash-tree ball.
    pub fn set_hash_tree_ball(&mut self, ball: &BallId, unit: &UnitId) {
        self.put_raw(keys::hash_tree_ball(ball), unit.as_bytes().to_vec());
    }

    /// Advance the last stable MCI. Applied to the in-memory counter only
    /// after a successful commit, so concurrent readers never observe an
    /// MCI whose side effects are still uncommitted.
    pub fn set_last_stable_mci(&mut self, mci: u64) -> Result<(), StoreError> {
        self.put_bincode(keys::meta("last_stable_mci"), &mci)?;
        self.staged_last_stable_mci = Some(mci);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Authors, outputs, inputs
    // -----------------------------------------------------------------------

    /// Insert an author row and the by-author index.
    pub fn insert_author(&mut self, unit: &UnitId, row: &AuthorRow) -> Result<(), StoreError> {
        self.put_bincode(keys::author(unit, &row.address), row)?;
        self.put_raw(keys::unit_by_author(&row.address, unit), Vec::new());
        Ok(())
    }

    /// Insert an output row and its by-address index.
    pub fn insert_output(
        &mut self,
        unit: &UnitId,
        message_index: u32,
        output_index: u32,
        row: &OutputRow,
    ) -> Result<(), StoreError> {
        self.put_bincode(keys::output(unit, message_index, output_index), row)?;
        self.put_raw(
            keys::output_by_address(&row.address, unit, message_index, output_index),
            Vec::new(),
        );
        Ok(())
    }

    /// Mark an output spent (stable serial spend).
    pub fn mark_output_spent(
        &mut self,
        unit: &str,
        message_index: u32,
        output_index: u32,
    ) -> Result<(), StoreError> {
        let key = keys::output(unit, message_index, output_index);
        let mut row = self
            .get::<OutputRow>(&key)?
            .ok_or_else(|| StoreError::Missing(format!("output {unit}:{message_index}:{output_index}")))?;
        row.is_spent = true;
        self.put_bincode(key, &row)
    }

    /// Insert an input row. Serial transfer inputs claim the `spu` key;
    /// a pre-existing claim - staged or committed - fails the insert with
    /// [`StoreError::UniqueViolation`]. Every transfer input additionally
    /// lands in the all-spenders index.
    pub fn insert_input(
        &mut self,
        unit: &UnitId,
        message_index: u32,
        input_index: u32,
        row: &InputRow,
    ) -> Result<(), StoreError> {
        if let InputKind::Transfer {
            src_unit,
            src_message_index,
            src_output_index,
        } = &row.kind
        {
            self.put_raw(
                keys::spender(src_unit, *src_message_index, *src_output_index, unit),
                Vec::new(),
            );
            if row.is_unique.is_some() {
                let claim_key =
                    keys::serial_spender(src_unit, *src_message_index, *src_output_index);
                // A staged delete means the claim is gone; only fall back
                // to committed state when the stage never touched the key.
                let existing = match self.view.get(&claim_key) {
                    Some(staged) => staged.clone(),
                    None => self.store.rows_get_raw(&claim_key)?,
                };
                if let Some(existing) = existing {
                    let existing_unit = String::from_utf8_lossy(&existing).into_owned();
                    if existing_unit != *unit {
                        return Err(StoreError::UniqueViolation {
                            src: format!("{src_unit}:{src_message_index}:{src_output_index}"),
                            existing: existing_unit,
                        });
                    }
                }
                self.put_raw(claim_key, unit.as_bytes().to_vec());
            }
        }
        self.put_bincode(keys::input(unit, message_index, input_index), row)
    }

    /// Demote the serial claims touching `src` held by `units`: their
    /// input rows flip to `is_unique = None` and the claim key is freed.
    /// Applied to all members of a conflict set in one transaction so the
    /// constraint keeps protecting honest spends.
    pub fn clear_serial_claims(
        &mut self,
        src_unit: &str,
        src_msg: u32,
        src_out: u32,
        units: &[UnitId],
    ) -> Result<(), StoreError> {
        self.delete(keys::serial_spender(src_unit, src_msg, src_out));
        for unit in units {
            let prefix = keys::scan_prefix("i", &[unit]);
            for (key, value) in self.scan(&prefix, 10_000)? {
                let mut row: InputRow = Store::decode(&key, &value)?;
                let matches = matches!(
                    &row.kind,
                    InputKind::Transfer { src_unit: u, src_message_index: m, src_output_index: o }
                        if u == src_unit && *m == src_msg && *o == src_out
                );
                if matches && row.is_unique.is_some() {
                    row.is_unique = None;
                    self.put_bincode(key, &row)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Definitions, attestations, assets, AAs
    // -----------------------------------------------------------------------

    /// Store a revealed definition.
    pub fn insert_definition(&mut self, chash: &str, row: &DefinitionRow) -> Result<(), StoreError> {
        self.put_bincode(keys::definition(chash), row)
    }

    /// Record a stabilized definition change.
    pub fn insert_definition_change(
        &mut self,
        address: &str,
        mci: u64,
        unit: &UnitId,
        new_chash: &str,
    ) -> Result<(), StoreError> {
        self.put_bincode(
            keys::definition_change(address, mci, unit),
            &new_chash.to_string(),
        )
    }

    /// Record an attestation.
    pub fn insert_attestation(
        &mut self,
        attestor: &str,
        attested: &str,
        unit: &UnitId,
        profile_json: &str,
    ) -> Result<(), StoreError> {
        self.put_bincode(
            keys::attestation(attestor, attested, unit),
            &profile_json.to_string(),
        )
    }

    /// Record an asset definition.
    pub fn insert_asset(&mut self, asset_unit: &UnitId, row: &AssetRow) -> Result<(), StoreError> {
        self.put_bincode(keys::asset(asset_unit), row)
    }

    /// Record an AA deployment.
    pub fn insert_aa_address(&mut self, address: &str, row: &AaRow) -> Result<(), StoreError> {
        self.put_bincode(keys::aa_address(address), row)
    }

    /// Enqueue an AA trigger at its deterministic position.
    pub fn enqueue_aa_trigger(
        &mut self,
        mci: u64,
        position: u32,
        row: &AaTriggerRow,
    ) -> Result<(), StoreError> {
        self.put_bincode(keys::aa_trigger(mci, position, &row.unit), row)
    }

    /// Remove a consumed trigger.
    pub fn remove_aa_trigger(&mut self, mci: u64, position: u32, unit: &UnitId) {
        self.delete(keys::aa_trigger(mci, position, unit));
    }

    /// Record an AA response.
    pub fn record_aa_response(&mut self, row: &AaResponseRow) -> Result<(), StoreError> {
        self.put_bincode(keys::aa_response(&row.trigger_unit), row)
    }

    /// Set an AA balance.
    pub fn set_aa_balance(&mut self, aa: &str, asset: &str, amount: u64) -> Result<(), StoreError> {
        self.put_bincode(keys::aa_balance(aa, asset), &amount)
    }

    // -----------------------------------------------------------------------
    // Governance & fees
    // -----------------------------------------------------------------------

    /// Record the active vote of one address on one subject (replaces any
    /// earlier vote by key construction).
    pub fn put_system_vote(
        &mut self,
        subject: SystemSubject,
        address: &Address,
        row: &SystemVoteRow,
    ) -> Result<(), StoreError> {
        self.put_bincode(keys::system_vote(subject, address), row)
    }

    /// Record a recomputed governed value, effective from `since_mci`.
    pub fn set_system_var(
        &mut self,
        subject: SystemSubject,
        since_mci: u64,
        row: &SystemVarRow,
    ) -> Result<(), StoreError> {
        self.put_bincode(keys::system_var(subject, since_mci), row)
    }

    /// Record a TPS fee balance entry effective at `mci`.
    pub fn set_tps_balance(
        &mut self,
        address: &str,
        mci: u64,
        balance: i64,
    ) -> Result<(), StoreError> {
        self.put_bincode(keys::tps_balance(address, mci), &balance)
    }

    // -----------------------------------------------------------------------
    // Intake bookkeeping
    // -----------------------------------------------------------------------

    /// Record a permanently rejected joint.
    pub fn insert_known_bad(&mut self, unit: &str, row: &KnownBadRow) -> Result<(), StoreError> {
        self.put_bincode(keys::known_bad(unit), row)
    }

    /// Park a joint awaiting dependencies, with its dependency edges.
    pub fn park_unhandled(&mut self, unit: &UnitId, row: &UnhandledRow) -> Result<(), StoreError> {
        for missing in &row.missing_units {
            self.put_raw(keys::dependency(missing, unit), Vec::new());
        }
        self.put_bincode(keys::unhandled(unit), row)
    }

    /// Remove a parked joint and its dependency edges.
    pub fn remove_unhandled(&mut self, unit: &UnitId) -> Result<(), StoreError> {
        if let Some(row) = self.get::<UnhandledRow>(&keys::unhandled(unit))? {
            for missing in &row.missing_units {
                self.delete(keys::dependency(missing, unit));
            }
        }
        self.delete(keys::unhandled(unit));
        Ok(())
    }

    /// Archive a joint body (voided or uncovered units).
    pub fn archive_joint(&mut self, unit: &UnitId, joint_json: &str) -> Result<(), StoreError> {
        self.put_bincode(keys::archived(unit), &joint_json.to_string())
    }

    // -----------------------------------------------------------------------
    // Terminal operations
    // -----------------------------------------------------------------------

    /// Apply the staged batch atomically. The batch is synced; the row
    /// commit is the durability point of a save.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.store.rows_apply(&self.ops, true)?;
        if let Some(mci) = self.staged_last_stable_mci {
            self.store.set_last_stable_mci_in_memory(mci);
        }
        self.committed = true;
        Ok(())
    }

    /// Drop the stage without applying.
    pub fn rollback(mut self) {
        self.ops.clear();
        self.view.clear();
        self.committed = true; // Nothing to warn about on drop.
    }
}

impl Drop for StoreTx<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.ops.is_empty() {
            debug!(staged = self.ops.len(), "transaction dropped without commit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use shared_types::Sequence;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::for_testing(dir.path().to_string_lossy())).unwrap();
        (dir, store)
    }

    fn props(unit: &str, parents: Vec<UnitId>) -> UnitProps {
        UnitProps {
            unit: unit.into(),
            level: 0,
            witnessed_level: 0,
            best_parent_unit: parents.first().cloned(),
            is_on_main_chain: false,
            main_chain_index: None,
            latest_included_mc_index: None,
            is_stable: false,
            is_free: true,
            sequence: Sequence::Good,
            timestamp: 1,
            parent_units: parents,
            witness_list_unit: None,
            last_ball_mci: 0,
            author_addresses: vec!["ADDR".into()],
            headers_commission: 100,
            payload_commission: 100,
            tps_fee: 0,
            actual_tps_fee: None,
        }
    }

    fn transfer_input(src: &str) -> InputRow {
        InputRow {
            kind: InputKind::Transfer {
                src_unit: src.into(),
                src_message_index: 0,
                src_output_index: 0,
            },
            address: "ADDR".into(),
            asset: None,
            is_unique: Some(true),
        }
    }

    #[test]
    fn read_your_writes_and_commit() {
        let (_dir, store) = open_store();
        let mut tx = store.begin_tx();
        tx.insert_unit(&UnitRow {
            props: props("U1", vec![]),
            unstable_message_refs: 0,
        })
        .unwrap();
        assert!(tx.unit_props("U1").unwrap().is_some());
        // Not visible outside the transaction until commit.
        assert!(store.unit_props("U1").unwrap().is_none());
        tx.commit().unwrap();
        assert!(store.unit_props("U1").unwrap().is_some());
        assert_eq!(store.free_units().unwrap(), vec!["U1".to_string()]);
    }

    #[test]
    fn rollback_discards_stage() {
        let (_dir, store) = open_store();
        let mut tx = store.begin_tx();
        tx.insert_unit(&UnitRow {
            props: props("U1", vec![]),
            unstable_message_refs: 0,
        })
        .unwrap();
        tx.rollback();
        assert!(store.unit_props("U1").unwrap().is_none());
    }

    #[test]
    fn child_insert_clears_parent_tip() {
        let (_dir, store) = open_store();
        let mut tx = store.begin_tx();
        tx.insert_unit(&UnitRow {
            props: props("P", vec![]),
            unstable_message_refs: 0,
        })
        .unwrap();
        tx.insert_unit(&UnitRow {
            props: props("C", vec!["P".into()]),
            unstable_message_refs: 0,
        })
        .unwrap();
        tx.commit().unwrap();
        assert_eq!(store.free_units().unwrap(), vec!["C".to_string()]);
        assert_eq!(store.children("P").unwrap(), vec!["C".to_string()]);
        assert!(!store.unit_props("P").unwrap().unwrap().is_free);
    }

    #[test]
    fn serial_spend_constraint_rejects_second_claim() {
        let (_dir, store) = open_store();
        let mut tx = store.begin_tx();
        tx.insert_input(&"SPENDER1".into(), 0, 0, &transfer_input("SRC"))
            .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin_tx();
        let err = tx
            .insert_input(&"SPENDER2".into(), 0, 0, &transfer_input("SRC"))
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));

        // A conflict-marked input (is_unique = None) is accepted.
        let mut row = transfer_input("SRC");
        row.is_unique = None;
        tx.insert_input(&"SPENDER2".into(), 0, 0, &row).unwrap();
        tx.commit().unwrap();

        let spenders = store.spenders_of("SRC", 0, 0).unwrap();
        assert_eq!(spenders.len(), 2);
        assert_eq!(
            store.serial_spender_of("SRC", 0, 0).unwrap(),
            Some("SPENDER1".to_string())
        );
    }

    #[test]
    fn clear_serial_claims_demotes_all_members() {
        let (_dir, store) = open_store();
        let mut tx = store.begin_tx();
        tx.insert_input(&"W1".into(), 0, 0, &transfer_input("SRC"))
            .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin_tx();
        tx.clear_serial_claims("SRC", 0, 0, &["W1".to_string()])
            .unwrap();
        let mut row = transfer_input("SRC");
        row.is_unique = None;
        tx.insert_input(&"W2".into(), 0, 0, &row).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.serial_spender_of("SRC", 0, 0).unwrap(), None);
        let w1_input: InputRow = store
            .rows_get_raw(&keys::input("W1", 0, 0))
            .unwrap()
            .map(|b| bincode::deserialize(&b).unwrap())
            .unwrap();
        assert_eq!(w1_input.is_unique, None);
    }

    #[test]
    fn last_stable_mci_applies_on_commit_only() {
        let (_dir, store) = open_store();
        let mut tx = store.begin_tx();
        tx.set_last_stable_mci(5).unwrap();
        assert_eq!(store.last_stable_mci(), 0);
        tx.commit().unwrap();
        assert_eq!(store.last_stable_mci(), 5);
    }
}
