//! # Shared Bus
//!
//! In-process broadcast of node lifecycle events. Subsystems that merely
//! observe the ledger (peers to notify, light subscriptions, metrics)
//! subscribe here instead of being called by the writer, which keeps the
//! hot path free of observer-specific code.
//!
//! The bus is lossy for slow consumers: a subscriber that lags past the
//! channel capacity misses events and is told how many it missed. The hot
//! path never blocks on observers.

pub mod events;

pub use events::NodeEvent;

use tokio::sync::broadcast;
use tracing::trace;

/// Default per-subscriber buffer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Cloneable broadcast bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// Bus with an explicit per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Returns how many
    /// subscribers will observe it; zero subscribers is not an error.
    pub fn publish(&self, event: NodeEvent) -> usize {
        trace!(?event, "publishing");
        self.sender.send(event).map(|_| self.sender.receiver_count()).unwrap_or(0)
    }

    /// Open a subscription starting at the next published event.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }
}
