//! History request/response shapes.

use serde::{Deserialize, Serialize};
use shared_types::{Address, BallId, Joint, UnitId};

/// A light client's history request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Addresses the client watches.
    pub addresses: Vec<Address>,
    /// Specific units the client asks for directly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_joints: Vec<UnitId>,
    /// Stable units the client already has (excluded from the response).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_stable_units: Vec<UnitId>,
    /// The operator set the client trusts.
    pub witnesses: Vec<Address>,
}

impl HistoryRequest {
    /// Deterministic tag identifying this request for sticky rejection.
    pub fn tag(&self) -> String {
        let mut addresses = self.addresses.clone();
        addresses.sort();
        addresses.join(",")
    }
}

/// One link of the proof chain: the ball skeleton of a relevant unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofBall {
    /// The unit.
    pub unit: UnitId,
    /// Its ball.
    pub ball: BallId,
    /// Its MCI.
    pub main_chain_index: u64,
    /// Parent balls, for chain verification.
    pub parent_balls: Vec<BallId>,
}

/// The server's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HistoryResponse {
    /// Joints mentioning the requested addresses, newest first.
    pub joints: Vec<Joint>,
    /// Proof chain balls anchoring the stable joints.
    pub proofchain_balls: Vec<ProofBall>,
    /// The witness-majority proof for the unstable part.
    pub unstable_mc_joints: Vec<Joint>,
    /// AA responses touching the requested addresses. Served as-is: the
    /// server does not prove them, and clients needing stronger
    /// guarantees must cross-check independent servers.
    pub aa_responses: Vec<serde_json::Value>,
}
