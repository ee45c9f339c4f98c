//! Neighbor list of the local node.
//!
//! A topology update carries the whole cluster graph; only the local
//! node's entry is retained, and it replaces the previous list in one swap.

use crate::id::NodeId;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The set of nodes this node may contact directly.
#[derive(Debug)]
pub struct Topology {
    local: NodeId,
    neighbors: RwLock<Arc<[NodeId]>>,
}

impl Topology {
    /// Create an empty topology for `local`.
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            neighbors: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    /// Replace the neighbor list from a full cluster mapping.
    ///
    /// Entries for other nodes are ignored. The local id and repeated ids
    /// are dropped; the remaining order is preserved. A mapping without a
    /// local entry leaves this node with no neighbors.
    pub fn replace(&self, mapping: &HashMap<NodeId, Vec<NodeId>>) -> Arc<[NodeId]> {
        let mut seen = HashSet::new();
        let list: Arc<[NodeId]> = mapping
            .get(&self.local)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|n| **n != self.local && seen.insert((*n).clone()))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
            .into();

        *self.neighbors.write() = Arc::clone(&list);
        list
    }

    /// Current neighbor list.
    pub fn neighbors(&self) -> Arc<[NodeId]> {
        Arc::clone(&self.neighbors.read())
    }
}
