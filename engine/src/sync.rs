//! Broadcast change feed - the production notification fan-out.
//!
//! Backed by `tokio::sync::broadcast`: every connected device holds a
//! receiver; a slow receiver that lags past the channel capacity loses the
//! oldest events. That lossiness is within contract - delivery is
//! best-effort and consumers reconcile against the ticket store.

use redemption_core::{ChangeEvent, ChangePublisher, PublishError};
use tokio::sync::broadcast;

/// Default buffered capacity per subscriber.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`ChangeEvent`]s to all connected subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl BroadcastChangeFeed {
    /// Create a feed with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a feed with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Subscribe a new consumer. Events published before this call are not
    /// delivered.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Number of currently connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangePublisher for BroadcastChangeFeed {
    fn publish(&self, event: ChangeEvent) -> Result<(), PublishError> {
        // send() only fails when no receiver exists; with nobody listening
        // there is nothing to deliver.
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers)
    }
}
