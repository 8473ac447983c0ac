//! Change notification
//!
//! After a transaction commits, the store publishes one [`ChangeEvent`] per
//! path it wrote or deleted. Delivery is fire-and-forget: a bus with no
//! listeners simply drops the event.

use jsondb_core::path::JsonPath;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// What happened at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The path was written by `set`, `update` or `push`
    Updated,
    /// The path was deleted
    Deleted,
}

impl ChangeKind {
    /// Event name on the bus
    pub fn event_name(self) -> &'static str {
        match self {
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

/// One committed change
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Kind of change
    pub kind: ChangeKind,
    /// Affected path: leading `/`, no trailing `/`, `/` for the root
    pub path: String,
}

impl ChangeEvent {
    /// Event for a written path
    pub fn updated(path: &JsonPath) -> Self {
        ChangeEvent {
            kind: ChangeKind::Updated,
            path: path.to_string(),
        }
    }

    /// Event for a deleted path
    pub fn deleted(path: &JsonPath) -> Self {
        ChangeEvent {
            kind: ChangeKind::Deleted,
            path: path.to_string(),
        }
    }

    /// Event name on the bus
    pub fn name(&self) -> &'static str {
        self.kind.event_name()
    }
}

/// Destination for committed change events
pub trait ChangeBus: Send + Sync {
    /// Publish one event. Must not block.
    fn publish(&self, event: ChangeEvent);
}

/// In-process bus over a `tokio` broadcast channel.
///
/// Needs no runtime: receivers can be drained with `try_recv`. Slow receivers
/// lose the oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastBus {
    /// Bus buffering up to `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        BroadcastBus { sender }
    }

    /// New receiver seeing every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        BroadcastBus::new(1024)
    }
}

impl ChangeBus for BroadcastBus {
    fn publish(&self, event: ChangeEvent) {
        if self.sender.send(event).is_err() {
            trace!(target: "jsondb::store", "Change event dropped, no receivers");
        }
    }
}
