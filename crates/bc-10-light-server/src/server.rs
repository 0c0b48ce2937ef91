//! # Request Handlers
//!
//! Each handler reads the stable snapshot; none takes the `write` lock.
//! `get_history` is serialized per peer through the named-mutex kernel
//! and its scans carry the hard `MAX_HISTORY_ITEMS + 1` bound at the
//! storage layer - the server never buffers an unbounded result and
//! trims afterwards.

use crate::errors::LightError;
use crate::history::{HistoryRequest, HistoryResponse, ProofBall};
use crate::proof::{StableBallRef, WitnessProof};
use bc_02_object_store::{keys, Store};
use bc_11_sync_kernel::MutexKernel;
use parking_lot::Mutex;
use serde_json::Value;
use shared_types::{locks, Joint, UnitId, MAX_HISTORY_ITEMS, MAX_REFRESH_LAG};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// The light-protocol server.
pub struct LightServer {
    store: Store,
    kernel: MutexKernel,
    /// Request tags already rejected as too large; retries fail fast so a
    /// client cannot amplify scan load by repeating a hopeless request.
    rejected_tags: Mutex<HashSet<String>>,
}

impl LightServer {
    /// Server over a store handle.
    pub fn new(store: Store, kernel: MutexKernel) -> Self {
        Self {
            store,
            kernel,
            rejected_tags: Mutex::new(HashSet::new()),
        }
    }

    /// The witness-majority proof from the current tip down to the last
    /// stable ball, plus operator definition joints.
    pub fn get_witness_proof(&self) -> Result<WitnessProof, LightError> {
        let mut proof = WitnessProof::default();
        let last_stable = self.store.last_stable_mci();

        // Unstable main chain: walk best parents from the best tip down
        // to the first stable unit.
        let free = self.store.free_units()?;
        let mut best: Option<shared_types::UnitProps> = None;
        for unit in &free {
            if let Some(props) = self.store.unit_props(unit)? {
                let replace = match &best {
                    None => true,
                    Some(current) => props.best_parent_rank() > current.best_parent_rank(),
                };
                if replace {
                    best = Some(props);
                }
            }
        }
        let mut cursor = best.map(|p| p.unit);
        while let Some(unit) = cursor {
            let Some(props) = self.store.unit_props(&unit)? else {
                break;
            };
            if props.is_stable {
                break;
            }
            if let Some(joint) = self.store.joint(&unit)? {
                proof.unstable_mc_joints.push(joint);
            }
            cursor = props.best_parent_unit;
        }

        // Operator definitions so the client can check the signatures of
        // the joints above.
        let operators = self.store.op_list_at(last_stable)?;
        let mut seen_units: BTreeSet<UnitId> = BTreeSet::new();
        for operator in &operators {
            let chash = self.store.definition_chash_at(operator, last_stable)?;
            if let Some(row) = self.store.definition(&chash)? {
                if seen_units.insert(row.unit.clone()) {
                    if let Some(joint) = self.store.joint(&row.unit)? {
                        proof.witness_change_and_definition_joints.push(joint);
                    }
                }
            }
        }

        // The stable anchor.
        if let Some(unit) = self.store.mc_unit_at(last_stable)? {
            if let Some(ball) = self.store.ball_of_unit(&unit)? {
                proof.last_stable_mc_ball = Some(StableBallRef {
                    ball,
                    unit,
                    main_chain_index: last_stable,
                });
            }
        }
        Ok(proof)
    }

    /// History for a set of addresses, bounded and proof-chained. One
    /// in-flight request per peer.
    pub async fn get_history(
        &self,
        request: &HistoryRequest,
        peer: &str,
    ) -> Result<HistoryResponse, LightError> {
        if request.addresses.is_empty() && request.requested_joints.is_empty() {
            return Err(LightError::BadRequest(
                "history request names no addresses or units".into(),
            ));
        }
        let tag = request.tag();
        if self.rejected_tags.lock().contains(&tag) {
            return Err(LightError::TooLarge {
                max: MAX_HISTORY_ITEMS,
            });
        }

        let lock_name = format!("{}-{peer}", locks::GET_HISTORY_REQUEST);
        let _guard = self.kernel.lock(&lock_name).await;
        debug!(peer, addresses = request.addresses.len(), "serving history");

        let known: HashSet<&UnitId> = request.known_stable_units.iter().collect();
        let mut selected: BTreeSet<UnitId> = request.requested_joints.iter().cloned().collect();

        // The scan bound is LIMIT+1 pushed into the storage layer: one
        // extra row proves overflow without buffering beyond it.
        for address in &request.addresses {
            let authored = self
                .store
                .rows_scan_bounded(&keys::units_of_author(address), MAX_HISTORY_ITEMS + 1)?;
            for (key, _) in authored {
                selected.insert(keys::last_part(&key));
            }
            let outputs = self
                .store
                .outputs_of_address(address, MAX_HISTORY_ITEMS + 1)?;
            for ((unit, _, _), _) in outputs {
                selected.insert(unit);
            }
            if selected.len() > MAX_HISTORY_ITEMS {
                warn!(peer, %tag, "history too large; rejection is sticky");
                self.rejected_tags.lock().insert(tag);
                return Err(LightError::TooLarge {
                    max: MAX_HISTORY_ITEMS,
                });
            }
        }

        let mut response = HistoryResponse::default();
        for unit in &selected {
            if known.contains(unit) {
                continue;
            }
            let Some(joint) = self.store.joint(unit)? else {
                continue;
            };
            let Some(props) = self.store.unit_props(unit)? else {
                continue;
            };
            if props.is_stable {
                if let (Some(ball), Some(mci)) = (
                    self.store.ball_of_unit(unit)?,
                    props.main_chain_index,
                ) {
                    let mut parent_balls = Vec::new();
                    for parent in &props.parent_units {
                        if let Some(parent_ball) = self.store.ball_of_unit(parent)? {
                            parent_balls.push(parent_ball);
                        }
                    }
                    response.proofchain_balls.push(ProofBall {
                        unit: unit.clone(),
                        ball,
                        main_chain_index: mci,
                        parent_balls,
                    });
                }
            }
            response.joints.push(joint);
        }

        // AA responses touching the watched addresses: trusted, unproven.
        for address in &request.addresses {
            if self.store.aa_row(address)?.is_some() {
                for (_, value) in self
                    .store
                    .rows_scan_bounded(&keys::scan_prefix("aar", &[]), MAX_HISTORY_ITEMS)?
                {
                    if let Ok(row) = bincode::deserialize::<bc_02_object_store::AaResponseRow>(&value)
                    {
                        if row.aa_address == *address {
                            response.aa_responses.push(serde_json::json!({
                                "trigger_unit": row.trigger_unit,
                                "aa_address": row.aa_address,
                                "mci": row.mci,
                                "bounced": row.bounced,
                                "response_unit": row.response_unit,
                                "response": row.response_json,
                            }));
                        }
                    }
                }
            }
        }

        response.unstable_mc_joints = self.get_witness_proof()?.unstable_mc_joints;
        Ok(response)
    }

    /// The current definition of an address. The client must size- and
    /// shape-check the value BEFORE stringifying or persisting it.
    pub fn get_definition(&self, address: &str) -> Result<Option<Value>, LightError> {
        let chash = self
            .store
            .definition_chash_at(address, self.store.last_stable_mci())?;
        match self.store.definition(&chash)? {
            Some(row) => serde_json::from_str(&row.definition_json)
                .map(Some)
                .map_err(|e| LightError::BadRequest(e.to_string())),
            None => Ok(None),
        }
    }

    /// Units stabilized after `since_mci` plus the current free joints.
    /// Cursors older than `last_stable_mci - MAX_REFRESH_LAG` are refused
    /// rather than served from a full history scan.
    pub fn refresh(&self, since_mci: u64) -> Result<Vec<Joint>, LightError> {
        let last_stable = self.store.last_stable_mci();
        let minimum = last_stable.saturating_sub(MAX_REFRESH_LAG);
        if since_mci < minimum {
            return Err(LightError::Stale {
                requested: since_mci,
                minimum,
            });
        }
        let mut joints = Vec::new();
        for mci in since_mci.saturating_add(1)..=last_stable {
            for unit in self.store.stable_units_at(mci)? {
                if let Some(joint) = self.store.joint(&unit)? {
                    joints.push(joint);
                }
            }
        }
        for unit in self.store.free_units()? {
            if let Some(joint) = self.store.joint(&unit)? {
                joints.push(joint);
            }
        }
        Ok(joints)
    }

    /// Subscription entry: identical semantics to [`Self::refresh`]; the
    /// caller keeps the cursor.
    pub fn subscribe(&self, last_mci: u64) -> Result<Vec<Joint>, LightError> {
        self.refresh(last_mci)
    }

    /// The catchup skeleton: stable main-chain balls above `from_mci`,
    /// oldest first, capped at `limit`. A syncing peer records these as
    /// hash-tree balls and then pulls the joints they anchor.
    pub fn get_catchup_balls(
        &self,
        from_mci: u64,
        limit: usize,
    ) -> Result<Vec<ProofBall>, LightError> {
        let last_stable = self.store.last_stable_mci();
        let mut balls = Vec::new();
        for mci in from_mci.saturating_add(1)..=last_stable {
            if balls.len() >= limit {
                break;
            }
            let Some(unit) = self.store.mc_unit_at(mci)? else {
                continue;
            };
            let Some(ball) = self.store.ball_of_unit(&unit)? else {
                continue;
            };
            let Some(props) = self.store.unit_props(&unit)? else {
                continue;
            };
            let mut parent_balls = Vec::new();
            for parent in &props.parent_units {
                if let Some(parent_ball) = self.store.ball_of_unit(parent)? {
                    parent_balls.push(parent_ball);
                }
            }
            balls.push(ProofBall {
                unit,
                ball,
                main_chain_index: mci,
                parent_balls,
            });
        }
        Ok(balls)
    }
}
