//! Fee accounting errors.

use bc_02_object_store::StoreError;
use thiserror::Error;

/// Failures of fee accounting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TpsFeeError {
    /// The store failed underneath.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The declared fee plus the recipient's balance does not cover the
    /// required fee.
    #[error("insufficient tps fee for {address}: balance {balance} + paid {paid} < required {required}")]
    Insufficient {
        /// The underfunded recipient.
        address: String,
        /// Balance at the unit's last-ball MCI.
        balance: i64,
        /// The recipient's share of the declared fee.
        paid: i64,
        /// The recipient's share of the required fee.
        required: i64,
    },

    /// Recipient shares do not sum to 100.
    #[error("commission shares sum to {0}, expected 100")]
    BadShares(u32),
}
