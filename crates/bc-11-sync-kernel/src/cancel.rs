//! Cooperative cancellation for long-running catch-up work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// The flag was raised; the batch loop should unwind via its guards.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cancelled")]
pub struct Cancelled;

/// A shared cancellation flag. Batch workers call [`CancelFlag::checkpoint`]
/// between batches; acquired locks and connections release through scoped
/// guards as the `Err` propagates.
#[derive(Clone, Default)]
pub struct CancelFlag {
    raised: Arc<AtomicBool>,
}

impl CancelFlag {
    /// New, unraised flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Whether the flag has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Fail fast if cancelled. Call between batches.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
