//! Node lifecycle events.

use serde::{Deserialize, Serialize};
use shared_types::{Address, UnitId};

/// Everything observers can learn about the ledger without querying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeEvent {
    /// A unit was validated and durably saved.
    UnitSaved {
        /// The saved unit.
        unit: UnitId,
        /// Whether it arrived with conflicts (temp-bad).
        has_conflicts: bool,
    },
    /// A save rolled back; caches were rebuilt from disk.
    SaveFailed {
        /// The failed unit.
        unit: UnitId,
        /// Failure detail.
        reason: String,
    },
    /// Stability advanced through this MCI.
    MciStabilized {
        /// The newly stable index.
        mci: u64,
    },
    /// A joint was permanently rejected.
    JointRejected {
        /// Offending unit id (or canonical hash for unhashable joints).
        unit: UnitId,
        /// Rejection reason.
        reason: String,
    },
    /// An AA handler ran at stabilization.
    AaResponded {
        /// The triggering unit.
        trigger_unit: UnitId,
        /// The agent that ran.
        aa_address: Address,
        /// Response unit, if the handler produced one.
        response_unit: Option<UnitId>,
        /// Whether the handler bounced.
        bounced: bool,
    },
}
