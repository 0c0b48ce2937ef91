//! # Named Mutex Kernel
//!
//! A registry of asynchronous mutexes addressed by name. The well-known
//! names are in [`shared_types::locks`]; per-address composition locks are
//! minted on demand and garbage-collected when uncontended.

use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// The named-mutex registry. Cheap to clone; clones share the lock table.
#[derive(Clone, Default)]
pub struct MutexKernel {
    table: Arc<SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl MutexKernel {
    /// Fresh kernel with an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a single named lock.
    pub async fn lock(&self, name: &str) -> KernelGuard {
        self.lock_all(&[name]).await
    }

    /// Acquire several named locks at once. Names are deduplicated and
    /// acquired in sorted order, which rules out lock-order inversion
    /// between tasks taking overlapping sets.
    pub async fn lock_all(&self, names: &[&str]) -> KernelGuard {
        let mut sorted: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for name in &sorted {
            let slot = self.slot(name);
            trace!(lock = %name, "acquiring");
            guards.push(slot.lock_owned().await);
            trace!(lock = %name, "acquired");
        }
        KernelGuard {
            names: sorted,
            guards,
        }
    }

    /// Whether anyone currently holds `name`. Diagnostic only; the answer
    /// is stale the moment it returns.
    pub fn is_locked(&self, name: &str) -> bool {
        let table = self.table.lock();
        table
            .get(name)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Drop table entries for uncontended dynamic locks (`c-<address>`),
    /// bounding table growth under address churn.
    pub fn sweep(&self) {
        let mut table = self.table.lock();
        table.retain(|name, slot| {
            !name.starts_with("c-") || Arc::strong_count(slot) > 1 || slot.try_lock().is_err()
        });
    }

    fn slot(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock();
        table
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Scoped possession of a set of named locks. Releases on drop, in reverse
/// acquisition order, on every exit path including panics.
pub struct KernelGuard {
    names: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl KernelGuard {
    /// Names held by this guard, sorted.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether this guard holds `name`; used to assert lock discipline at
    /// entry to write-side functions.
    pub fn holds(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

impl Drop for KernelGuard {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}
