//! # Save Path
//!
//! `save_joint` is the only way a unit enters the store. Under the
//! `write` mutex it stages all rows, syncs the KV batch, commits the
//! rows, synchronizes caches and then drives stabilization; any failure
//! before the row commit rolls everything back (reverse KV batch, cache
//! rebuild) and reports `save_failed`.
//!
//! Response joints produced by AA hooks are adopted through the same
//! path while the lock is still held, so agent effects are never
//! observable half-applied.

use crate::errors::WriterError;
use bc_02_object_store::{
    keys, AuthorRow, DefinitionRow, InputKind, InputRow, KnownBadRow, OutputRow, Store, UnitRow,
};
use bc_03_dag::latest_included_mc_index;
use bc_05_validation::AcceptedJoint;
use bc_06_main_chain::Stabilizer;
use bc_11_sync_kernel::MutexKernel;
use shared_bus::{EventBus, NodeEvent};
use shared_types::{
    locks, Input, Joint, MessageBody, Sequence, UnitId, UnitProps, ValidationError,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// The single mutating path.
pub struct Writer {
    store: Store,
    kernel: MutexKernel,
    bus: EventBus,
    stabilizer: Stabilizer,
}

struct CacheOps {
    saved_props: UnitProps,
    message_refs: Vec<(UnitId, u32)>,
    flipped: Vec<UnitProps>,
}

impl Writer {
    /// Assemble the writer.
    pub fn new(store: Store, kernel: MutexKernel, bus: EventBus, stabilizer: Stabilizer) -> Self {
        Self {
            store,
            kernel,
            bus,
            stabilizer,
        }
    }

    /// The underlying store handle.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Persist a validated joint and drive stabilization. Returns the
    /// MCIs that became stable as a consequence.
    pub async fn save_joint(&self, accepted: AcceptedJoint) -> Result<Vec<u64>, WriterError> {
        let mut stabilized = Vec::new();
        {
            let _guard = self.kernel.lock(locks::WRITE).await;
            self.persist(&accepted)?;
            stabilized.extend(self.run_stabilization_batch()?);
        }
        // Catch-up batching: full batches mean more work is pending; the
        // lock is released between batches so intake can interleave.
        while stabilized.len() as u64 >= self.stabilizer.batch_size()
            && stabilized.len() % self.stabilizer.batch_size() as usize == 0
        {
            tokio::task::yield_now().await;
            let more = {
                let _guard = self.kernel.lock(locks::WRITE).await;
                self.run_stabilization_batch()?
            };
            if more.is_empty() {
                break;
            }
            stabilized.extend(more);
        }
        Ok(stabilized)
    }

    /// Record a permanently rejected joint so it is never re-processed.
    pub async fn record_known_bad(
        &self,
        unit: &UnitId,
        joint_json: &str,
        error: &ValidationError,
        received_at: u64,
    ) -> Result<(), WriterError> {
        let _guard = self.kernel.lock(locks::WRITE).await;
        let mut tx = self.store.begin_tx();
        tx.insert_known_bad(
            unit,
            &KnownBadRow {
                error: error.to_string(),
                code: error.wire_code().to_string(),
                received_at,
                joint_json: joint_json.to_string(),
            },
        )?;
        tx.commit()?;
        self.bus.publish(NodeEvent::JointRejected {
            unit: unit.clone(),
            reason: error.to_string(),
        });
        Ok(())
    }

    /// Record the hash-tree balls received from a catchup peer; the sync
    /// driver then pulls and validates the joints they anchor.
    pub async fn record_hash_tree_balls(
        &self,
        entries: &[(shared_types::BallId, UnitId)],
    ) -> Result<(), WriterError> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.kernel.lock(locks::WRITE).await;
        let mut tx = self.store.begin_tx();
        for (ball, unit) in entries {
            tx.set_hash_tree_ball(ball, unit);
        }
        tx.commit()?;
        Ok(())
    }

    /// Park a joint whose dependencies are missing (or whose acceptance
    /// is blocked on evolving state), recording its dependency edges.
    pub async fn park_unhandled(
        &self,
        unit: &UnitId,
        joint_json: &str,
        peer: &str,
        missing_units: Vec<UnitId>,
        parked_at: u64,
    ) -> Result<(), WriterError> {
        let _guard = self.kernel.lock(locks::WRITE).await;
        let mut tx = self.store.begin_tx();
        tx.park_unhandled(
            unit,
            &bc_02_object_store::UnhandledRow {
                joint_json: joint_json.to_string(),
                peer: peer.to_string(),
                parked_at,
                missing_units,
            },
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a parked joint (validated, rejected, or expired).
    pub async fn remove_unhandled(&self, unit: &UnitId) -> Result<(), WriterError> {
        let _guard = self.kernel.lock(locks::WRITE).await;
        let mut tx = self.store.begin_tx();
        tx.remove_unhandled(unit)?;
        tx.commit()?;
        Ok(())
    }

    /// Evict parked joints older than the TTL. Returns how many went.
    pub async fn purge_expired_unhandled(
        &self,
        now: u64,
        ttl_secs: u64,
    ) -> Result<usize, WriterError> {
        let _guard = self.kernel.lock(locks::WRITE).await;
        let parked = self.store.unhandled_all(10_000)?;
        let mut tx = self.store.begin_tx();
        let mut purged = 0usize;
        for (unit, row) in parked {
            if now.saturating_sub(row.parked_at) > ttl_secs {
                tx.remove_unhandled(&unit)?;
                tx.archive_joint(&unit, &row.joint_json)?;
                purged += 1;
            }
        }
        if purged > 0 {
            tx.commit()?;
        }
        Ok(purged)
    }

    /// One stabilization batch plus adoption of any response joints,
    /// under the already-held `write` lock.
    fn run_stabilization_batch(&self) -> Result<Vec<u64>, WriterError> {
        let outcome = self.stabilizer.advance(&self.store)?;
        for joint in &outcome.response_joints {
            self.adopt_response_joint(joint)?;
        }
        for mci in &outcome.stabilized_mcis {
            self.bus.publish(NodeEvent::MciStabilized { mci: *mci });
        }
        Ok(outcome.stabilized_mcis)
    }

    /// Stage, sync, commit. Cache sync and events happen only after the
    /// row commit; any earlier failure unwinds completely.
    fn persist(&self, accepted: &AcceptedJoint) -> Result<(), WriterError> {
        let unit_id = accepted.props.unit.clone();
        self.store.set_inflight_unit(&unit_id)?;

        match self.persist_inner(accepted) {
            Ok(cache_ops) => {
                self.store.clear_inflight_unit()?;
                self.store
                    .cache_note_saved(cache_ops.saved_props, &cache_ops.message_refs);
                for props in cache_ops.flipped {
                    self.store.cache_update_props(props);
                }
                self.bus.publish(NodeEvent::UnitSaved {
                    unit: unit_id.clone(),
                    has_conflicts: accepted.props.sequence == Sequence::TempBad,
                });
                info!(unit = %unit_id, "unit saved");
                Ok(())
            }
            Err((error, reverse)) => {
                warn!(unit = %unit_id, error = %error, "save failed, rolling back");
                if let Some(reverse) = reverse {
                    self.store.kv_apply_reverse(reverse)?;
                }
                self.store.reset_memory()?;
                self.store.clear_inflight_unit()?;
                self.bus.publish(NodeEvent::SaveFailed {
                    unit: unit_id,
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn persist_inner(
        &self,
        accepted: &AcceptedJoint,
    ) -> Result<CacheOps, (WriterError, Option<bc_02_object_store::kv::ReverseBatch>)> {
        let staged = self.stage_rows(accepted).map_err(|e| (e, None))?;
        let (tx, joint_bytes, cache_ops) = staged;

        // KV sync happens BEFORE the row commit; the reverse batch undoes
        // it if the commit then fails.
        let mut kv = self.store.kv_batch();
        kv.put(keys::kv_joint(&accepted.props.unit), joint_bytes)
            .map_err(|e| (WriterError::Store(e), None))?;
        let reverse = kv.write(true).map_err(|e| (WriterError::Store(e), None))?;

        match tx.commit() {
            Ok(()) => Ok(cache_ops),
            Err(e) => Err((WriterError::Store(e), Some(reverse))),
        }
    }

    fn stage_rows<'a>(
        &'a self,
        accepted: &AcceptedJoint,
    ) -> Result<(bc_02_object_store::StoreTx<'a>, Vec<u8>, CacheOps), WriterError> {
        let unit = &accepted.joint.unit;
        let unit_id = &accepted.props.unit;
        let mut tx = self.store.begin_tx();
        let mut cache_ops = CacheOps {
            saved_props: accepted.props.clone(),
            message_refs: Vec::new(),
            flipped: Vec::new(),
        };

        tx.insert_unit(&UnitRow {
            props: accepted.props.clone(),
            unstable_message_refs: 0,
        })?;

        for author in &unit.authors {
            let definition_chash = self
                .store
                .definition_chash_at(&author.address, accepted.props.last_ball_mci)?;
            tx.insert_author(
                unit_id,
                &AuthorRow {
                    address: author.address.clone(),
                    definition_chash,
                    authentifiers: author
                        .authentifiers
                        .iter()
                        .map(|(path, value)| (path.clone(), value.clone()))
                        .collect(),
                },
            )?;
        }
        for (address, definition, chash) in &accepted.definitions {
            tx.insert_definition(
                chash,
                &DefinitionRow {
                    definition_json: definition.to_string(),
                    unit: unit_id.clone(),
                    has_reference: false,
                },
            )?;
            debug!(%address, %chash, "definition recorded");
        }

        // Conflict sets lose their serial claims first, so staged inserts
        // below see the freed constraint keys.
        let mut conflicted: BTreeMap<(u32, u32), ()> = BTreeMap::new();
        for ds in &accepted.double_spend_inputs {
            conflicted.insert((ds.message_index, ds.input_index), ());
            tx.clear_serial_claims(
                &ds.src_unit,
                ds.src_message_index,
                ds.src_output_index,
                &ds.conflicting_units,
            )?;
            for other in &ds.conflicting_units {
                if let Some(mut props) = tx.unit_props(other)? {
                    if props.sequence == Sequence::Good {
                        props.sequence = Sequence::TempBad;
                        tx.update_props(&props)?;
                        cache_ops.flipped.push(props);
                    }
                }
            }
        }

        for (msg_index, message) in unit.messages.iter().enumerate() {
            let MessageBody::Payment(payment) = &message.body else {
                continue;
            };
            for (out_index, output) in payment.outputs.iter().enumerate() {
                tx.insert_output(
                    unit_id,
                    msg_index as u32,
                    out_index as u32,
                    &OutputRow {
                        address: output.address.clone(),
                        amount: output.amount,
                        asset: payment.asset.clone(),
                        denomination: payment.denomination,
                        is_spent: false,
                    },
                )?;
            }
            for (in_index, input) in payment.inputs.iter().enumerate() {
                let row = self.input_row(
                    unit,
                    payment,
                    input,
                    conflicted.contains_key(&(msg_index as u32, in_index as u32)),
                )?;
                if let InputKind::Transfer { src_unit, .. } = &row.kind {
                    cache_ops.message_refs.push((src_unit.clone(), 1));
                    if let Some(mut src_row) = tx.get::<UnitRow>(&keys::unit(src_unit))? {
                        src_row.unstable_message_refs += 1;
                        tx.update_unit_row(&src_row)?;
                    }
                }
                tx.insert_input(unit_id, msg_index as u32, in_index as u32, &row)?;
            }
        }

        let joint_bytes = serde_json::to_vec(&accepted.joint)
            .map_err(|e| WriterError::Inconsistent(e.to_string()))?;
        Ok((tx, joint_bytes, cache_ops))
    }

    fn input_row(
        &self,
        unit: &shared_types::Unit,
        payment: &shared_types::PaymentPayload,
        input: &Input,
        is_conflicted: bool,
    ) -> Result<InputRow, WriterError> {
        let (kind, address) = match input {
            Input::Transfer {
                unit: src_unit,
                message_index,
                output_index,
            } => {
                let output = self
                    .store
                    .output(src_unit, *message_index, *output_index)?
                    .ok_or_else(|| {
                        WriterError::Inconsistent(format!(
                            "validated input references missing output {src_unit}:{message_index}:{output_index}"
                        ))
                    })?;
                (
                    InputKind::Transfer {
                        src_unit: src_unit.clone(),
                        src_message_index: *message_index,
                        src_output_index: *output_index,
                    },
                    output.address,
                )
            }
            Input::Issue {
                amount,
                serial_number,
                address,
            } => (
                InputKind::Issue {
                    amount: *amount,
                    serial_number: *serial_number,
                },
                address
                    .clone()
                    .or_else(|| unit.first_author_address().map(str::to_string))
                    .unwrap_or_default(),
            ),
            Input::HeadersCommission {
                from_main_chain_index,
                to_main_chain_index,
            } => (
                InputKind::HeadersCommission {
                    from_mci: *from_main_chain_index,
                    to_mci: *to_main_chain_index,
                },
                unit.first_author_address().unwrap_or_default().to_string(),
            ),
            Input::Witnessing {
                from_main_chain_index,
                to_main_chain_index,
            } => (
                InputKind::Witnessing {
                    from_mci: *from_main_chain_index,
                    to_mci: *to_main_chain_index,
                },
                unit.first_author_address().unwrap_or_default().to_string(),
            ),
        };
        let is_unique = match input {
            Input::Transfer { .. } if is_conflicted => None,
            _ => Some(true),
        };
        Ok(InputRow {
            kind,
            address,
            asset: payment.asset.clone(),
            is_unique,
        })
    }

    /// Adopt an AA response joint produced inside stabilization: derive
    /// its graph props (no signatures to validate - its content is a
    /// deterministic function of committed state) and persist it through
    /// the normal path.
    fn adopt_response_joint(&self, joint: &Joint) -> Result<(), WriterError> {
        let unit_id = joint
            .unit
            .unit
            .clone()
            .ok_or_else(|| WriterError::ResponseAdoption("response joint has no id".into()))?;
        if self.store.is_known_unit(&unit_id)? {
            return Ok(());
        }
        let mut level = 0u64;
        let mut witnessed_level = 0u64;
        let mut last_ball_mci = 0u64;
        for parent in &joint.unit.parent_units {
            let props = self.store.unit_props(parent)?.ok_or_else(|| {
                WriterError::ResponseAdoption(format!("response parent {parent} unknown"))
            })?;
            level = level.max(props.level + 1);
            witnessed_level = witnessed_level.max(props.witnessed_level);
            last_ball_mci = last_ball_mci.max(props.last_ball_mci);
        }
        let limci = latest_included_mc_index(&self.store, &joint.unit.parent_units)
            .map_err(|e| WriterError::ResponseAdoption(e.to_string()))?;

        let props = UnitProps {
            unit: unit_id,
            level,
            witnessed_level,
            best_parent_unit: joint.unit.parent_units.first().cloned(),
            is_on_main_chain: false,
            main_chain_index: None,
            latest_included_mc_index: limci,
            is_stable: false,
            is_free: true,
            sequence: Sequence::Good,
            timestamp: joint.unit.timestamp,
            parent_units: joint.unit.parent_units.clone(),
            witness_list_unit: None,
            last_ball_mci,
            author_addresses: joint
                .unit
                .author_addresses()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            headers_commission: joint.unit.headers_commission,
            payload_commission: joint.unit.payload_commission,
            tps_fee: 0,
            actual_tps_fee: None,
        };
        let accepted = AcceptedJoint {
            joint: joint.clone(),
            props,
            double_spend_inputs: vec![],
            definitions: vec![],
        };
        self.persist(&accepted)
    }
}
