//! The broadcast engine.
//!
//! Each broadcast id moves through `unseen -> accepted -> propagated`:
//!
//! 1. A client broadcast is always novel: it gets a fresh id.
//! 2. A peer relay is novel only if its id passes the deduplicator's
//!    check-and-mark; otherwise it is acknowledged and dropped.
//! 3. On acceptance the value is appended to the store, the fan-out is
//!    computed as `neighbors - already_got - {sender}`, the already-notified
//!    set is extended with this node and every destination, and one pending
//!    delivery per destination is enqueued for the transport worker.

use crate::config::BroadcastConfig;
use crate::pending::PendingTable;
use crate::relay::{Delivery, Relay};
use crate::worker::{spawn_workers, Courier, Workers};
use murmur_core::{Deduplicator, MessageId, NodeId, Topology, Value, ValueStore};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outcome of handing a broadcast to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Receipt {
    /// A client broadcast, accepted under a freshly minted id.
    Accepted { mid: MessageId, fanout: usize },
    /// A peer relay. `fresh` is false when the id was already known.
    Relayed {
        mid: MessageId,
        fresh: bool,
        fanout: usize,
    },
}

impl Receipt {
    pub fn mid(&self) -> MessageId {
        match self {
            Receipt::Accepted { mid, .. } | Receipt::Relayed { mid, .. } => *mid,
        }
    }

    pub fn fanout(&self) -> usize {
        match self {
            Receipt::Accepted { fanout, .. } | Receipt::Relayed { fanout, .. } => *fanout,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    client_broadcasts: AtomicU64,
    relays_accepted: AtomicU64,
    duplicates: AtomicU64,
    enqueued: AtomicU64,
    sweeps: AtomicU64,
    resent: AtomicU64,
    acknowledged: AtomicU64,
    failed_attempts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        Self::bump(&self.failed_attempts, 1);
    }
}

/// Point-in-time statistics about an engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub neighbors: usize,
    pub stored_values: usize,
    pub known_ids: usize,
    pub pending: usize,
    pub client_broadcasts: u64,
    pub relays_accepted: u64,
    pub duplicates: u64,
    pub enqueued: u64,
    pub sweeps: u64,
    pub resent: u64,
    pub acknowledged: u64,
    pub failed_attempts: u64,
}

/// Reliable gossip-broadcast engine for one node.
///
/// Topology, store, deduplicator and pending table are each guarded on
/// their own; the engine holds no lock across an `await`.
pub struct BroadcastEngine {
    local: NodeId,
    topology: Topology,
    store: ValueStore,
    dedup: Deduplicator,
    pending: PendingTable,
    outbound: mpsc::Sender<Delivery>,
    counters: Counters,
}

impl BroadcastEngine {
    /// Create an engine and the receiving end of its outbound queue.
    ///
    /// Nothing drains the queue until it is handed to a dispatcher; use
    /// [`BroadcastEngine::start`] for a fully wired engine.
    pub fn new(local: NodeId, config: &BroadcastConfig) -> (Self, mpsc::Receiver<Delivery>) {
        let (outbound, queue) = mpsc::channel(config.queue_capacity.max(1));
        let dedup = match config.dedup_capacity {
            Some(capacity) => Deduplicator::with_capacity(capacity),
            None => Deduplicator::new(),
        };

        let engine = Self {
            topology: Topology::new(local.clone()),
            local,
            store: ValueStore::new(),
            dedup,
            pending: PendingTable::new(),
            outbound,
            counters: Counters::default(),
        };
        (engine, queue)
    }

    /// Create an engine and spawn its transport worker and retry sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<C: Courier>(
        local: NodeId,
        config: &BroadcastConfig,
        courier: Arc<C>,
    ) -> (Arc<Self>, Workers) {
        let (engine, queue) = Self::new(local, config);
        let engine = Arc::new(engine);
        let workers = spawn_workers(Arc::clone(&engine), queue, courier, config);
        (engine, workers)
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    /// Replace the neighbor list from a full cluster mapping.
    pub fn set_topology(&self, mapping: &HashMap<NodeId, Vec<NodeId>>) -> Arc<[NodeId]> {
        let neighbors = self.topology.replace(mapping);
        debug!(node = %self.local, neighbors = ?neighbors, "topology replaced");
        neighbors
    }

    pub fn neighbors(&self) -> Arc<[NodeId]> {
        self.topology.neighbors()
    }

    /// Every value accepted so far, in acceptance order.
    pub fn snapshot(&self) -> Vec<Value> {
        self.store.snapshot()
    }

    pub fn is_known(&self, mid: &MessageId) -> bool {
        self.dedup.is_known(mid)
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Accept a value introduced by a client.
    pub async fn accept_client(&self, value: Value) -> Receipt {
        let mid = MessageId::generate();
        self.dedup.mark_known(mid);
        Counters::bump(&self.counters.client_broadcasts, 1);
        debug!(node = %self.local, %mid, value, "accepted client broadcast");

        let fanout = self.propagate(value, mid, BTreeSet::new(), None).await;
        Receipt::Accepted { mid, fanout }
    }

    /// Accept a relay of an existing broadcast from a peer.
    ///
    /// Duplicates produce no store mutation and no fan-out; the caller
    /// acknowledges them like any other relay.
    pub async fn accept_relay(&self, from: &NodeId, relay: Relay) -> Receipt {
        let mid = relay.mid;
        if !self.dedup.check_and_mark(&mid) {
            Counters::bump(&self.counters.duplicates, 1);
            debug!(node = %self.local, %from, %mid, "duplicate relay");
            return Receipt::Relayed {
                mid,
                fresh: false,
                fanout: 0,
            };
        }

        Counters::bump(&self.counters.relays_accepted, 1);
        debug!(node = %self.local, %from, %mid, value = relay.value, "accepted relay");
        let fanout = self
            .propagate(relay.value, mid, relay.already_got, Some(from))
            .await;
        Receipt::Relayed {
            mid,
            fresh: true,
            fanout,
        }
    }

    /// Clear the pending delivery of `mid` to `peer`.
    ///
    /// Returns `false` when nothing was pending, e.g. for a late duplicate ack.
    pub fn acknowledge(&self, peer: &NodeId, mid: &MessageId) -> bool {
        let cleared = self.pending.acknowledge(peer, mid);
        if cleared {
            Counters::bump(&self.counters.acknowledged, 1);
            debug!(node = %self.local, %peer, %mid, "delivery acknowledged");
        }
        cleared
    }

    /// Re-enqueue every pending delivery. Returns how many were re-enqueued.
    pub async fn sweep(&self) -> usize {
        let outstanding = self.pending.snapshot();
        Counters::bump(&self.counters.sweeps, 1);

        let mut resent = 0;
        for delivery in outstanding {
            if self.outbound.send(delivery).await.is_err() {
                warn!(node = %self.local, "outbound queue closed; sweep abandoned");
                break;
            }
            resent += 1;
        }
        Counters::bump(&self.counters.resent, resent as u64);
        resent
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn stats(&self) -> BroadcastStats {
        let c = &self.counters;
        BroadcastStats {
            neighbors: self.topology.neighbors().len(),
            stored_values: self.store.len(),
            known_ids: self.dedup.len(),
            pending: self.pending.len(),
            client_broadcasts: c.client_broadcasts.load(Ordering::Relaxed),
            relays_accepted: c.relays_accepted.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            enqueued: c.enqueued.load(Ordering::Relaxed),
            sweeps: c.sweeps.load(Ordering::Relaxed),
            resent: c.resent.load(Ordering::Relaxed),
            acknowledged: c.acknowledged.load(Ordering::Relaxed),
            failed_attempts: c.failed_attempts.load(Ordering::Relaxed),
        }
    }

    async fn propagate(
        &self,
        value: Value,
        mid: MessageId,
        mut already_got: BTreeSet<NodeId>,
        sender: Option<&NodeId>,
    ) -> usize {
        self.store.append(value);

        let targets: Vec<NodeId> = self
            .topology
            .neighbors()
            .iter()
            .filter(|n| !already_got.contains(*n) && Some(*n) != sender)
            .cloned()
            .collect();

        // Cover every destination before the first send so concurrent
        // replies never re-cover each other.
        already_got.insert(self.local.clone());
        already_got.extend(targets.iter().cloned());

        let relay = Relay {
            value,
            mid,
            already_got,
        };
        for to in &targets {
            self.enqueue(Delivery::new(to.clone(), relay.clone())).await;
        }
        targets.len()
    }

    async fn enqueue(&self, delivery: Delivery) {
        self.pending.insert(&delivery);
        Counters::bump(&self.counters.enqueued, 1);

        if let Err(err) = self.outbound.send(delivery).await {
            warn!(
                node = %self.local,
                to = %err.0.to,
                "outbound queue closed; delivery left pending"
            );
        }
    }
}

impl std::fmt::Debug for BroadcastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastEngine")
            .field("local", &self.local)
            .field("stats", &self.stats())
            .finish()
    }
}
