//! # Joint Intake
//!
//! The funnel between peers and the validator: serialize per-joint work
//! behind the `handle-joint` mutex, route validation outcomes to their
//! destinations (writer, known-bad table, unhandled parking), and fan out
//! to dependents when a missing parent finally arrives.

use bc_01_hashing::unit_id;
use bc_02_object_store::Store;
use bc_05_validation::{validate, ValidationOptions};
use bc_07_writer::Writer;
use bc_11_sync_kernel::MutexKernel;
use shared_types::{locks, Joint, UnitId, ValidationError, UNHANDLED_JOINT_TTL_SECS};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What became of an incoming joint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Validated and saved; lists MCIs stabilized as a consequence.
    Saved {
        /// The unit id.
        unit: UnitId,
        /// Newly stable MCIs.
        stabilized: Vec<u64>,
    },
    /// Already in the store.
    AlreadyKnown(UnitId),
    /// Already known to be bad; not re-processed.
    KnownBad(UnitId),
    /// Permanently rejected now.
    Rejected {
        /// The unit id (or best-effort hash).
        unit: UnitId,
        /// The terminal error.
        error: ValidationError,
    },
    /// Parked awaiting the listed units.
    Parked {
        /// The unit id.
        unit: UnitId,
        /// Missing dependencies to request from the peer.
        missing: Vec<UnitId>,
    },
    /// Transient failure; parked for retry.
    Retry(UnitId),
}

/// The intake pipeline.
pub struct Intake {
    store: Store,
    kernel: MutexKernel,
    writer: Arc<Writer>,
    options: ValidationOptions,
    max_ready_units_per_batch: usize,
}

impl Intake {
    /// Assemble the pipeline.
    pub fn new(
        store: Store,
        kernel: MutexKernel,
        writer: Arc<Writer>,
        options: ValidationOptions,
        max_ready_units_per_batch: usize,
    ) -> Self {
        Self {
            store,
            kernel,
            writer,
            options,
            max_ready_units_per_batch,
        }
    }

    /// Handle one candidate joint from `peer`. The `handle-joint` mutex
    /// serializes validation; it is released on every path out of this
    /// function, including errors, by guard scope.
    pub async fn handle_joint(&self, joint: Joint, peer: &str, now: u64) -> IntakeOutcome {
        let outcome = {
            let _guard = self.kernel.lock(locks::HANDLE_JOINT).await;
            self.process_joint(joint, peer, now).await
        };
        // Fan-out runs after the per-joint mutex releases; dependents
        // re-enter processing one at a time under the dependencies lock.
        if let IntakeOutcome::Saved { unit, .. } = &outcome {
            self.fan_out_dependents(unit, now).await;
        }
        outcome
    }

    /// Validate and route one joint. No fan-out here: the caller decides
    /// whether dependents get woken, so this can run inside the fan-out
    /// loop without re-entering its lock.
    async fn process_joint(&self, joint: Joint, peer: &str, now: u64) -> IntakeOutcome {
        // Cheap id first: dedup against known units and known-bad joints
        // before any heavier validation.
        let unit = match unit_id(&joint.unit) {
            Ok(id) => id,
            Err(e) => {
                return IntakeOutcome::Rejected {
                    unit: String::new(),
                    error: ValidationError::Joint(format!("cannot hash joint: {e}")),
                }
            }
        };
        match self.store.is_known_unit(&unit) {
            Ok(true) => return IntakeOutcome::AlreadyKnown(unit),
            Ok(false) => {}
            Err(e) => {
                return IntakeOutcome::Rejected {
                    unit,
                    error: ValidationError::Internal(e.to_string()),
                }
            }
        }
        if matches!(self.store.known_bad(&unit), Ok(Some(_))) {
            return IntakeOutcome::KnownBad(unit);
        }

        match validate(&self.store, &joint, now, &self.options) {
            Ok(accepted) => match self.writer.save_joint(accepted).await {
                Ok(stabilized) => IntakeOutcome::Saved { unit, stabilized },
                Err(e) => IntakeOutcome::Rejected {
                    unit,
                    error: ValidationError::Internal(e.to_string()),
                },
            },
            Err(ValidationError::NeedParentUnits(missing)) => {
                debug!(%unit, ?missing, "parking joint for missing parents");
                self.park(&unit, &joint, peer, missing.clone(), now).await;
                IntakeOutcome::Parked { unit, missing }
            }
            Err(ValidationError::Transient(reason)) => {
                debug!(%unit, %reason, "parking joint for retry");
                self.park(&unit, &joint, peer, vec![], now).await;
                IntakeOutcome::Retry(unit)
            }
            Err(error) if error.is_terminal() => {
                warn!(%unit, %error, "joint permanently rejected");
                let joint_json = serde_json::to_string(&joint).unwrap_or_default();
                if let Err(e) = self
                    .writer
                    .record_known_bad(&unit, &joint_json, &error, now)
                    .await
                {
                    warn!(%unit, error = %e, "failed to record known-bad joint");
                }
                IntakeOutcome::Rejected { unit, error }
            }
            Err(error) => IntakeOutcome::Rejected { unit, error },
        }
    }

    async fn park(&self, unit: &UnitId, joint: &Joint, peer: &str, missing: Vec<UnitId>, now: u64) {
        let joint_json = serde_json::to_string(joint).unwrap_or_default();
        if let Err(e) = self
            .writer
            .park_unhandled(unit, &joint_json, peer, missing, now)
            .await
        {
            warn!(%unit, error = %e, "failed to park joint");
        }
    }

    /// Re-run joints that were waiting on `arrived`. Bounded per batch by
    /// `max_ready_units_per_batch`, serialized by the `dependencies`
    /// mutex; newly satisfied joints may unlock further dependents, which
    /// queue behind them.
    async fn fan_out_dependents(&self, arrived: &UnitId, now: u64) {
        let _guard = self.kernel.lock(locks::DEPENDENCIES).await;
        let mut queue: VecDeque<UnitId> = VecDeque::new();
        queue.push_back(arrived.clone());
        let mut processed = 0usize;

        while let Some(ready_parent) = queue.pop_front() {
            let dependents = match self.store.dependents_of(&ready_parent) {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "dependency scan failed");
                    return;
                }
            };
            for dependent in dependents {
                if processed >= self.max_ready_units_per_batch {
                    debug!(processed, "dependency batch cap reached");
                    return;
                }
                let Ok(Some(row)) = self.store.unhandled(&dependent) else {
                    continue;
                };
                let Ok(joint) = serde_json::from_str::<Joint>(&row.joint_json) else {
                    let _ = self.writer.remove_unhandled(&dependent).await;
                    continue;
                };
                // Still waiting on someone else? Leave it parked.
                let still_missing = row
                    .missing_units
                    .iter()
                    .any(|m| !matches!(self.store.is_known_unit(m), Ok(true)));
                if still_missing {
                    continue;
                }
                if let Err(e) = self.writer.remove_unhandled(&dependent).await {
                    warn!(unit = %dependent, error = %e, "failed to unpark joint");
                    continue;
                }
                processed += 1;
                let outcome = {
                    let _joint_guard = self.kernel.lock(locks::HANDLE_JOINT).await;
                    Box::pin(self.process_joint(joint, &row.peer, now)).await
                };
                if let IntakeOutcome::Saved { unit, .. } = &outcome {
                    info!(%unit, "dependency-unblocked joint saved");
                    queue.push_back(unit.clone());
                }
            }
        }
    }

    /// Replay every parked joint whose dependencies are now satisfied.
    /// This is the retry policy for transient parkings (last-ball races)
    /// and the catch-all sweep behind the event-driven fan-out. Returns
    /// how many joints were saved.
    pub async fn retry_unhandled(&self, now: u64) -> usize {
        let parked = match self.store.unhandled_all(self.max_ready_units_per_batch) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "unhandled scan failed");
                return 0;
            }
        };
        let mut saved = 0usize;
        for (unit, row) in parked {
            let still_missing = row
                .missing_units
                .iter()
                .any(|m| !matches!(self.store.is_known_unit(m), Ok(true)));
            if still_missing {
                continue;
            }
            let Ok(joint) = serde_json::from_str::<Joint>(&row.joint_json) else {
                let _ = self.writer.remove_unhandled(&unit).await;
                continue;
            };
            if self.writer.remove_unhandled(&unit).await.is_err() {
                continue;
            }
            let outcome = {
                let _guard = self.kernel.lock(locks::HANDLE_JOINT).await;
                self.process_joint(joint, &row.peer, now).await
            };
            if let IntakeOutcome::Saved { unit, .. } = outcome {
                saved += 1;
                self.fan_out_dependents(&unit, now).await;
            }
        }
        saved
    }

    /// Evict joints parked longer than the TTL.
    pub async fn purge_expired(&self, now: u64) -> usize {
        self.writer
            .purge_expired_unhandled(now, UNHANDLED_JOINT_TTL_SECS)
            .await
            .unwrap_or(0)
    }
}
