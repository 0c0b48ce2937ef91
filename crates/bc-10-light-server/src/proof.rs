//! Witness proof shape.

use serde::{Deserialize, Serialize};
use shared_types::{BallId, Joint, UnitId};

/// Proof that the current tip descends from the last stable ball through
/// an operator majority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WitnessProof {
    /// Unstable main-chain joints, tip first, down to the stable point.
    /// The operator majority is demonstrated by their authors.
    pub unstable_mc_joints: Vec<Joint>,
    /// Definition and definition-change joints of the operators, so the
    /// client can verify their signatures.
    pub witness_change_and_definition_joints: Vec<Joint>,
    /// The last stable ball the proof anchors to.
    pub last_stable_mc_ball: Option<StableBallRef>,
}

/// Reference to a stable ball.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableBallRef {
    /// Ball id.
    pub ball: BallId,
    /// Its unit.
    pub unit: UnitId,
    /// Its MCI.
    pub main_chain_index: u64,
}
