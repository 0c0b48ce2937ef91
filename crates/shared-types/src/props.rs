//! # Unit Properties
//!
//! The graph-level view of a unit: everything the DAG traversal, main-chain
//! and stability algorithms need without touching message content. Props
//! are written once at save time and mutated only under the `write` lock
//! (main-chain index, stability, sequence).

use crate::entities::{Address, UnitId};
use serde::{Deserialize, Serialize};

/// Validity lifecycle of a saved unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Sequence {
    /// Serial, no known conflicts.
    #[default]
    Good,
    /// Conflicting with another unsettled unit; tie-break pending.
    TempBad,
    /// Lost a double-spend tie-break after stabilization; content replaced
    /// by its hash.
    FinalBad,
}

/// Graph properties of a saved unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitProps {
    /// The unit id.
    pub unit: UnitId,
    /// Longest-path distance from genesis.
    pub level: u64,
    /// Level at which the unit's best-parent chain accumulates an operator
    /// majority.
    pub witnessed_level: u64,
    /// Parent with the highest witnessed level (tiebreak level, then id).
    /// `None` only for genesis.
    pub best_parent_unit: Option<UnitId>,
    /// Whether this unit sits on the current main chain.
    pub is_on_main_chain: bool,
    /// MCI of the first stable main-chain unit including this one.
    pub main_chain_index: Option<u64>,
    /// Highest MCI of any main-chain unit included by this unit.
    pub latest_included_mc_index: Option<u64>,
    /// Stability flag; never cleared once set.
    pub is_stable: bool,
    /// True while no other unit lists this one as a parent.
    pub is_free: bool,
    /// Validity lifecycle.
    pub sequence: Sequence,
    /// Author-claimed timestamp.
    pub timestamp: u64,
    /// Parent ids, sorted.
    pub parent_units: Vec<UnitId>,
    /// Operator-set pin.
    pub witness_list_unit: Option<UnitId>,
    /// The unit's validation-time last-ball MCI. Inclusion short-circuits
    /// must compare against this persisted value, not any later view.
    pub last_ball_mci: u64,
    /// Author addresses, sorted.
    pub author_addresses: Vec<Address>,
    /// Header size in canonical bytes.
    pub headers_commission: u32,
    /// Payload size in canonical bytes.
    pub payload_commission: u32,
    /// Declared congestion fee.
    pub tps_fee: u64,
    /// Congestion fee actually charged at stabilization.
    pub actual_tps_fee: Option<u64>,
}

impl UnitProps {
    /// Whether this unit's ordering can still change.
    pub fn is_unsettled(&self) -> bool {
        !self.is_stable
    }

    /// Props comparison key for deterministic tie-breaks: higher witnessed
    /// level wins, then lower level, then lexicographically smaller id.
    pub fn best_parent_rank(&self) -> (u64, std::cmp::Reverse<u64>, std::cmp::Reverse<UnitId>) {
        (
            self.witnessed_level,
            std::cmp::Reverse(self.level),
            std::cmp::Reverse(self.unit.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(unit: &str, wl: u64, level: u64) -> UnitProps {
        UnitProps {
            unit: unit.into(),
            level,
            witnessed_level: wl,
            best_parent_unit: None,
            is_on_main_chain: false,
            main_chain_index: None,
            latest_included_mc_index: None,
            is_stable: false,
            is_free: true,
            sequence: Sequence::Good,
            timestamp: 0,
            parent_units: vec![],
            witness_list_unit: None,
            last_ball_mci: 0,
            author_addresses: vec![],
            headers_commission: 0,
            payload_commission: 0,
            tps_fee: 0,
            actual_tps_fee: None,
        }
    }

    #[test]
    fn best_parent_rank_prefers_witnessed_level() {
        let a = props("AAAA", 10, 11);
        let b = props("BBBB", 9, 5);
        assert!(a.best_parent_rank() > b.best_parent_rank());
    }

    #[test]
    fn best_parent_rank_tiebreaks_by_level_then_id() {
        let a = props("AAAA", 10, 11);
        let b = props("BBBB", 10, 12);
        assert!(a.best_parent_rank() > b.best_parent_rank());

        let c = props("CCCC", 10, 11);
        // Same wl and level: lexicographically smaller id wins.
        assert!(a.best_parent_rank() > c.best_parent_rank());
    }

    #[test]
    fn sequence_serializes_kebab_case() {
        let v = serde_json::to_value(Sequence::FinalBad).unwrap();
        assert_eq!(v, "final-bad");
    }
}
