//! # Sync Kernel
//!
//! The concurrency discipline of the hot path. Validation, writing and
//! stabilization are serialized by named mutexes; catch-up work honors a
//! cooperative cancel flag; network waits carry deadlines.
//!
//! ## Guarantees
//!
//! - Every acquisition is paired with a release on every exit path,
//!   including panics: guards release on `Drop` and there is no manual
//!   unlock API to forget.
//! - Multi-name acquisition sorts names first, so two tasks acquiring
//!   overlapping sets cannot deadlock.
//! - Queueing per name is FIFO-fair.
//!
//! Re-acquiring a held name from the same logical task is expressed by
//! passing the guard down the call chain instead of lock reentrancy; the
//! borrow checker then proves the pairing statically.

pub mod cancel;
pub mod named_mutex;

pub use cancel::{CancelFlag, Cancelled};
pub use named_mutex::{KernelGuard, MutexKernel};

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// A deadline elapsed before the awaited operation finished.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("operation timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Await `fut` for at most `limit`. On timeout the task is abandoned;
/// resources it held release through their guards' `Drop`.
pub async fn with_deadline<T>(
    limit: Duration,
    fut: impl Future<Output = T>,
) -> Result<T, TimedOut> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimedOut(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_expires() {
        let res = with_deadline(Duration::from_millis(10), std::future::pending::<()>()).await;
        assert_eq!(res, Err(TimedOut(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn deadline_passes_through_result() {
        let res = with_deadline(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(res, Ok(7));
    }
}
