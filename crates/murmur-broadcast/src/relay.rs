//! Peer-to-peer broadcast payloads.

use murmur_core::{MessageId, NodeId, Value};
use std::collections::BTreeSet;

/// One relay of a broadcast, as sent from node to node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relay {
    pub value: Value,
    pub mid: MessageId,
    /// Nodes known to have received, or to be receiving, this broadcast.
    pub already_got: BTreeSet<NodeId>,
}

impl Relay {
    pub fn new(value: Value, mid: MessageId) -> Self {
        Self {
            value,
            mid,
            already_got: BTreeSet::new(),
        }
    }

    pub fn with_already_got(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.already_got.extend(nodes);
        self
    }
}

/// A relay addressed to one destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub to: NodeId,
    pub relay: Relay,
}

impl Delivery {
    pub fn new(to: NodeId, relay: Relay) -> Self {
        Self { to, relay }
    }
}
