//! Deliveries sent but not yet acknowledged.

use crate::relay::{Delivery, Relay};
use murmur_core::{MessageId, NodeId};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Pending-acknowledgment table keyed by `(destination, message id)`.
///
/// At most one entry exists per key; re-inserting overwrites the payload.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<(NodeId, MessageId), Relay>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Returns `true` if the key was not present.
    pub fn insert(&self, delivery: &Delivery) -> bool {
        self.entries
            .lock()
            .insert(
                (delivery.to.clone(), delivery.relay.mid),
                delivery.relay.clone(),
            )
            .is_none()
    }

    /// Remove the entry for `(peer, mid)`. Absent entries are not an error.
    pub fn acknowledge(&self, peer: &NodeId, mid: &MessageId) -> bool {
        self.entries.lock().remove(&(peer.clone(), *mid)).is_some()
    }

    pub fn contains(&self, peer: &NodeId, mid: &MessageId) -> bool {
        self.entries.lock().contains_key(&(peer.clone(), *mid))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of every outstanding delivery.
    pub fn snapshot(&self) -> Vec<Delivery> {
        self.entries
            .lock()
            .iter()
            .map(|((to, _), relay)| Delivery::new(to.clone(), relay.clone()))
            .collect()
    }
}
