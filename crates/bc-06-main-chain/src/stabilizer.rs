//! # The Stabilization Transaction
//!
//! One [`Stabilizer::advance`] call recomputes the main chain, stabilizes
//! up to `batch_size` MCIs and commits everything - sequence resolution,
//! ball assignment, governance tallies, data-feed indexing, fee
//! settlement, AA hook effects and the `last_stable_mci` advance - as one
//! row-store commit preceded by one synced KV batch. The caller holds the
//! `write` lock and loops for multi-batch catch-up, releasing the lock
//! between batches.

use crate::advance::{advance_main_chain, props_tx, unstable_units_tx};
use crate::errors::McError;
use crate::hooks::{StabilizationHooks, StabilizedUnit};
use crate::stability::next_stable_candidate;
use bc_02_object_store::{
    keys, AaRow, AssetRow, KvBatch, Store, StoreTx, SystemVarRow, SystemVoteRow,
};
use bc_09_tps_fees::{min_tps_fee_tx, settle_unit};
use shared_types::{
    Input, Joint, MessageBody, Sequence, SystemSubject, Unit, UnitId, UnitProps,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one advance call accomplished.
#[derive(Debug, Default)]
pub struct AdvanceOutcome {
    /// MCIs stabilized, in order.
    pub stabilized_mcis: Vec<u64>,
    /// Response joints produced by hooks, to be saved by the writer under
    /// the same `write` lock.
    pub response_joints: Vec<Joint>,
}

impl AdvanceOutcome {
    /// Whether another batch may be pending (the batch filled up).
    pub fn may_continue(&self, batch_size: u64) -> bool {
        self.stabilized_mcis.len() as u64 >= batch_size
    }
}

/// Main-chain advance + stability driver.
pub struct Stabilizer {
    hooks: Arc<dyn StabilizationHooks>,
    batch_size: u64,
}

impl Stabilizer {
    /// Stabilizer with the default batch size.
    pub fn new(hooks: Arc<dyn StabilizationHooks>) -> Self {
        Self {
            hooks,
            batch_size: 10,
        }
    }

    /// Override the per-transaction MCI batch bound.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The configured batch bound.
    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Run one advance + stabilization batch. Must be called under the
    /// `write` lock.
    pub fn advance(&self, store: &Store) -> Result<AdvanceOutcome, McError> {
        let mut tx = store.begin_tx();
        let mut kv = store.kv_batch();
        let mut touched = advance_main_chain(&mut tx)?;

        let mut outcome = AdvanceOutcome::default();
        let mut stabilized_props: Vec<UnitProps> = Vec::new();
        let mut released_refs: Vec<(UnitId, u32)> = Vec::new();

        while (outcome.stabilized_mcis.len() as u64) < self.batch_size {
            let Some((mci, _)) = next_stable_candidate(store, &tx)? else {
                break;
            };
            let summary = stabilize_mci(
                store,
                &mut tx,
                &mut kv,
                mci,
                &mut stabilized_props,
                &mut released_refs,
            )?;
            let responses = self
                .hooks
                .on_mci_stabilized(store, &mut tx, &mut kv, mci, &summary)?;
            outcome.response_joints.extend(responses);
            tx.set_last_stable_mci(mci)?;
            outcome.stabilized_mcis.push(mci);
        }

        if tx.is_empty() && kv.is_empty() {
            return Ok(outcome);
        }

        // Commit protocol: KV sync first, then the row commit; a row
        // failure is repaired by the reverse KV batch and a cache rebuild.
        let reverse = kv.write(true)?;
        if let Err(e) = tx.commit() {
            warn!(error = %e, "stabilization commit failed, reversing KV batch");
            store.kv_apply_reverse(reverse)?;
            store.reset_memory()?;
            return Err(e.into());
        }

        for props in touched.drain(..) {
            store.cache_update_props(props);
        }
        for props in stabilized_props {
            store.cache_note_stabilized(props, &[]);
        }
        for (unit, count) in group_refs(released_refs) {
            store.cache_release_refs(&unit, count);
        }
        if let Some(last) = outcome.stabilized_mcis.last() {
            info!(last_stable_mci = last, "stability advanced");
        }
        Ok(outcome)
    }
}

fn group_refs(refs: Vec<(UnitId, u32)>) -> BTreeMap<UnitId, u32> {
    let mut grouped = BTreeMap::new();
    for (unit, count) in refs {
        *grouped.entry(unit).or_insert(0) += count;
    }
    grouped
}

/// Stabilize every unit assigned to `mci`, in deterministic (level, id)
/// order.
fn stabilize_mci(
    store: &Store,
    tx: &mut StoreTx<'_>,
    kv: &mut KvBatch<'_>,
    mci: u64,
    stabilized_props: &mut Vec<UnitProps>,
    released_refs: &mut Vec<(UnitId, u32)>,
) -> Result<Vec<StabilizedUnit>, McError> {
    let mut members: Vec<UnitProps> = Vec::new();
    for unit in unstable_units_tx(tx)? {
        let props = props_tx(tx, &unit)?;
        if props.main_chain_index == Some(mci) && !props.is_stable {
            members.push(props);
        }
    }
    members.sort_by(|a, b| (a.level, &a.unit).cmp(&(b.level, &b.unit)));

    let actual_fee = min_tps_fee_tx(store, tx, mci)?;
    let mut summary = Vec::with_capacity(members.len());

    for (position, mut props) in members.into_iter().enumerate() {
        let mut joint = store
            .joint(&props.unit)?
            .ok_or_else(|| McError::Inconsistent(format!("missing joint for {}", props.unit)))?;

        // Resolve double-spend ties.
        let sequence = if props.sequence == Sequence::TempBad {
            if loses_tiebreak(tx, &props, &joint.unit, mci)? {
                Sequence::FinalBad
            } else {
                Sequence::Good
            }
        } else {
            props.sequence
        };

        if sequence == Sequence::FinalBad {
            debug!(unit = %props.unit, mci, "double-spend loser voided");
            let content_hash = bc_01_hashing::unit_content_hash(&joint.unit)
                .map_err(|e| McError::Inconsistent(e.to_string()))?;
            joint.unit.content_hash = Some(content_hash);
            joint.unit.messages.clear();
        } else {
            settle_good_unit(tx, kv, &joint.unit, &props.unit, mci, released_refs)?;
        }

        // Ball assignment closes the unit's position in the skeleton.
        let ball = assign_ball(tx, &props, mci)?;
        joint.ball = Some(ball);

        // Agent-authored units are fee-exempt; the deployment row may be
        // staged in this very transaction, so read through the tx view.
        let is_aa_response = tx.exists(&keys::aa_address(
            joint.unit.first_author_address().unwrap_or(""),
        ))?;
        if sequence == Sequence::Good && !is_aa_response {
            settle_unit(tx, &joint.unit, mci, actual_fee)?;
            props.actual_tps_fee = Some(actual_fee);
        }

        props.sequence = sequence;
        props.is_stable = true;
        tx.mark_stable(&props)?;

        kv.put(
            keys::kv_joint(&props.unit),
            serde_json::to_vec(&joint).map_err(|e| McError::Inconsistent(e.to_string()))?,
        )?;

        summary.push(StabilizedUnit {
            unit: props.unit.clone(),
            mci,
            position: position as u32,
            sequence,
        });
        stabilized_props.push(props);
    }
    Ok(summary)
}

/// Whether a temp-bad unit loses its double-spend tie: a conflicting
/// spender is already stable-good, or shares this MCI and precedes it in
/// the deterministic order (lower unit id).
fn loses_tiebreak(
    tx: &StoreTx<'_>,
    props: &UnitProps,
    unit: &Unit,
    mci: u64,
) -> Result<bool, McError> {
    for message in &unit.messages {
        let MessageBody::Payment(payment) = &message.body else {
            continue;
        };
        for input in &payment.inputs {
            let Some((src_unit, src_msg, src_out)) = input.source() else {
                continue;
            };
            for spender in spenders_tx(tx, src_unit, src_msg, src_out)? {
                if spender == props.unit {
                    continue;
                }
                let Some(sp) = tx.unit_props(&spender)? else {
                    continue;
                };
                if sp.is_stable && sp.sequence == Sequence::Good {
                    return Ok(true);
                }
                if sp.main_chain_index == Some(mci)
                    && sp.sequence != Sequence::FinalBad
                    && spender < props.unit
                {
                    return Ok(true);
                }
                if sp.main_chain_index.is_some_and(|m| m < mci) && sp.sequence != Sequence::FinalBad
                {
                    // The conflictor stabilizes at an earlier index and
                    // therefore wins regardless of id order.
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn spenders_tx(
    tx: &StoreTx<'_>,
    src_unit: &str,
    src_msg: u32,
    src_out: u32,
) -> Result<Vec<UnitId>, McError> {
    Ok(tx
        .scan(&keys::spenders_of(src_unit, src_msg, src_out), 10_000)?
        .into_iter()
        .map(|(key, _)| keys::last_part(&key))
        .collect())
}

/// Side effects of a winning unit: sources become spent, messages land in
/// their tables and indexes.
fn settle_good_unit(
    tx: &mut StoreTx<'_>,
    kv: &mut KvBatch<'_>,
    unit: &Unit,
    unit_id: &UnitId,
    mci: u64,
    released_refs: &mut Vec<(UnitId, u32)>,
) -> Result<(), McError> {
    for message in &unit.messages {
        match &message.body {
            MessageBody::Payment(payment) => {
                for input in &payment.inputs {
                    if let Input::Transfer {
                        unit: src_unit,
                        message_index,
                        output_index,
                    } = input
                    {
                        tx.mark_output_spent(src_unit, *message_index, *output_index)?;
                        released_refs.push((src_unit.clone(), 1));
                    }
                }
            }
            MessageBody::DataFeed(feed) => {
                let address = unit.first_author_address().unwrap_or("").to_string();
                for (name, value) in feed {
                    kv.put(
                        keys::kv_data_feed(
                            &address,
                            name,
                            value.type_tag(),
                            &feed_index_value(value),
                            mci,
                        ),
                        unit_id.as_bytes().to_vec(),
                    )?;
                    kv.put(
                        keys::kv_data_feed_latest(&address, name),
                        serde_json::to_vec(value)
                            .map_err(|e| McError::Inconsistent(e.to_string()))?,
                    )?;
                }
            }
            MessageBody::AddressDefinitionChange(change) => {
                let address = change
                    .address
                    .clone()
                    .or_else(|| unit.first_author_address().map(str::to_string))
                    .unwrap_or_default();
                tx.insert_definition_change(&address, mci, unit_id, &change.definition_chash)?;
            }
            MessageBody::Definition(aa) => {
                let base_aa = aa
                    .definition
                    .get(1)
                    .and_then(|v| v.get("base_aa"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                tx.insert_aa_address(
                    &aa.address,
                    &AaRow {
                        definition_json: aa.definition.to_string(),
                        base_aa,
                        unit: unit_id.clone(),
                        mci: Some(mci),
                    },
                )?;
            }
            MessageBody::Asset(asset) => {
                tx.insert_asset(
                    unit_id,
                    &AssetRow {
                        payload_json: serde_json::to_string(asset)
                            .map_err(|e| McError::Inconsistent(e.to_string()))?,
                        definer: unit.first_author_address().unwrap_or("").to_string(),
                        mci: Some(mci),
                    },
                )?;
            }
            MessageBody::Attestation(attestation) => {
                let attestor = unit.first_author_address().unwrap_or("").to_string();
                tx.insert_attestation(
                    &attestor,
                    &attestation.address,
                    unit_id,
                    &serde_json::to_string(&attestation.profile)
                        .map_err(|e| McError::Inconsistent(e.to_string()))?,
                )?;
            }
            MessageBody::SystemVote(vote) => {
                for author in unit.author_addresses() {
                    tx.put_system_vote(
                        vote.subject(),
                        &author.to_string(),
                        &SystemVoteRow {
                            value_json: vote_value_json(vote),
                            unit: unit_id.clone(),
                            mci,
                        },
                    )?;
                }
            }
            MessageBody::SystemVoteCount(subject) => {
                tally_votes(tx, *subject, mci, unit_id)?;
            }
            MessageBody::Text(_) | MessageBody::Data(_) | MessageBody::Poll(_)
            | MessageBody::Vote(_) => {}
        }
    }
    Ok(())
}

fn feed_index_value(value: &shared_types::FeedValue) -> String {
    match value {
        shared_types::FeedValue::String(s) => s.clone(),
        shared_types::FeedValue::Number(n) => keys::i64_ordered(*n),
    }
}

fn vote_value_json(vote: &shared_types::SystemVotePayload) -> String {
    match vote {
        shared_types::SystemVotePayload::OpList(ops) => {
            serde_json::to_string(ops).unwrap_or_default()
        }
        shared_types::SystemVotePayload::ThresholdSize(v)
        | shared_types::SystemVotePayload::BaseTpsFee(v)
        | shared_types::SystemVotePayload::TpsInterval(v)
        | shared_types::SystemVotePayload::TpsFeeMultiplier(v) => v.to_string(),
    }
}

/// Count the active votes for `subject` and record the winner effective
/// from the NEXT index: a recomputation triggered at `mci` can only
/// govern units anchored after it.
fn tally_votes(
    tx: &mut StoreTx<'_>,
    subject: SystemSubject,
    mci: u64,
    vote_count_unit: &UnitId,
) -> Result<(), McError> {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for (key, value) in tx.scan(&keys::system_votes_of(subject), 100_000)? {
        let row: SystemVoteRow = bc_02_object_store::Store::decode(&key, &value)?;
        *counts.entry(row.value_json).or_insert(0) += 1;
    }
    let Some(winner) = counts
        .into_iter()
        // Max votes; BTreeMap order makes the smaller value win ties.
        .fold(None::<(String, u32)>, |best, (value, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((value, count)),
        })
        .map(|(value, _)| value)
    else {
        return Ok(());
    };
    tx.set_system_var(
        subject,
        mci + 1,
        &SystemVarRow {
            value_json: winner,
            vote_count_unit: Some(vote_count_unit.clone()),
        },
    )?;
    Ok(())
}

/// Compute and stage the ball of a stabilized unit: parents' balls plus
/// the skiplist for round main-chain indexes.
fn assign_ball(tx: &mut StoreTx<'_>, props: &UnitProps, mci: u64) -> Result<String, McError> {
    let mut parent_balls = Vec::with_capacity(props.parent_units.len());
    for parent in &props.parent_units {
        let ball = tx
            .get_raw(&keys::ball_of_unit(parent))?
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .ok_or_else(|| {
                McError::Inconsistent(format!("parent {parent} of {} has no ball", props.unit))
            })?;
        parent_balls.push(ball);
    }
    let mut skiplist_balls = Vec::new();
    if props.is_on_main_chain && mci >= 10 && mci % 10 == 0 {
        if let Some(skip_unit) = tx.get_raw(&keys::mc_unit(mci - 10))? {
            let skip_unit = String::from_utf8_lossy(&skip_unit).into_owned();
            if let Some(ball) = tx.get_raw(&keys::ball_of_unit(&skip_unit))? {
                skiplist_balls.push(String::from_utf8_lossy(&ball).into_owned());
            }
        }
    }
    let ball = bc_01_hashing::ball_id(&props.unit, &parent_balls, &skiplist_balls);
    tx.set_ball(&props.unit, &ball);
    Ok(ball)
}
