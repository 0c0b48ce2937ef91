//! # Protocol Constants
//!
//! Consensus-critical numbers. Anything tunable per deployment lives in
//! [`crate::params::NetworkParams`] instead; the values here are fixed for
//! every network.

/// Current unit format version.
pub const VERSION: &str = "4.0";

/// Network discriminator carried by every unit.
pub const ALT: &str = "1";

/// Size of the operator committee.
pub const COUNT_OPERATORS: usize = 12;

/// Operator majority: witnessing by at least this many operators advances
/// stability.
pub const MAJORITY_OF_OPERATORS: usize = COUNT_OPERATORS / 2 + 1;

/// Hard cap on the serialized size of a single unit, in bytes.
pub const MAX_UNIT_LENGTH: usize = 5_000_000;

/// Largest integer exactly representable by every peer implementation.
/// Definition weights and `required` fields above this are rejected.
pub const MAX_SAFE_INTEGER: u64 = (1u64 << 53) - 1;

/// Definition evaluator budget: accumulated structural complexity.
pub const MAX_COMPLEXITY: u32 = 100;

/// Definition evaluator budget: operator evaluations.
pub const MAX_OPS: u32 = 1000;

/// Recursion cap for canonical encoding and size accounting.
pub const MAX_CANONICAL_DEPTH: u32 = 1024;

/// Data feed field limits, in bytes of the canonical text form.
pub const MAX_DATA_FEED_NAME_LENGTH: usize = 64;
/// Maximum length of a single data feed value.
pub const MAX_DATA_FEED_VALUE_LENGTH: usize = 64;

/// Maximum number of parents a unit may list.
pub const MAX_PARENTS_PER_UNIT: usize = 16;

/// Maximum authors per unit.
pub const MAX_AUTHORS_PER_UNIT: usize = 16;

/// Maximum messages per unit.
pub const MAX_MESSAGES_PER_UNIT: usize = 128;

/// Hard cap on rows returned by a light history request. The underlying
/// scan is bounded by `MAX_HISTORY_ITEMS + 1`, never buffered past it.
pub const MAX_HISTORY_ITEMS: usize = 1000;

/// Refresh/subscribe requests older than `last_stable_mci - MAX_REFRESH_LAG`
/// are refused rather than served from a full history scan.
pub const MAX_REFRESH_LAG: u64 = 10_000;

/// How long a joint with missing dependencies is parked before eviction.
pub const UNHANDLED_JOINT_TTL_SECS: u64 = 3600;

/// Accepted clock skew for post-upgrade timestamp validation, in seconds.
pub const TIMESTAMP_SKEW_TOLERANCE_SECS: u64 = 600;

/// Breadcrumb log records are truncated to this many bytes before they are
/// buffered.
pub const MAX_BREADCRUMB_BYTES: usize = 10 * 1024;

/// Native currency total cap (issued in full by the genesis issue input).
pub const TOTAL_BASE_SUPPLY: u64 = 1_000_000_000_000_000;

/// Well-known named mutexes of the concurrency kernel.
pub mod locks {
    /// Serializes validation of a single joint.
    pub const HANDLE_JOINT: &str = "handle-joint";
    /// Serializes all mutating writes: save, stabilization, AA execution,
    /// TPS fee settlement.
    pub const WRITE: &str = "write";
    /// Serializes dependency-ready fan-out.
    pub const DEPENDENCIES: &str = "dependencies";
    /// One in-flight light history request per peer.
    pub const GET_HISTORY_REQUEST: &str = "get_history_request";

    /// Per-address composition lock name.
    pub fn compose(address: &str) -> String {
        format!("c-{address}")
    }
}
