//! In-memory cluster of engines for testing.
//!
//! Every node runs a real engine with real workers; a [`MemoryCourier`]
//! hands relays straight to the destination engine. Requests and replies
//! can be lost at a seeded rate, and links can be cut and healed. A lost
//! message costs the sender its full delivery timeout, just as a silent
//! network would.

use crate::config::BroadcastConfig;
use crate::engine::{BroadcastEngine, Receipt};
use crate::relay::Relay;
use crate::worker::{Courier, DeliveryError, Workers};
use async_trait::async_trait;
use murmur_core::{NodeId, Value};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Name of the `i`th simulated node.
pub fn node(i: usize) -> NodeId {
    NodeId::new(format!("n{}", i))
}

/// `n0 - n1 - ... - n(k-1)`.
pub fn line_topology(n: usize) -> HashMap<NodeId, Vec<NodeId>> {
    (0..n)
        .map(|i| {
            let mut neighbors = Vec::new();
            if i > 0 {
                neighbors.push(node(i - 1));
            }
            if i + 1 < n {
                neighbors.push(node(i + 1));
            }
            (node(i), neighbors)
        })
        .collect()
}

/// A line with its ends joined.
pub fn ring_topology(n: usize) -> HashMap<NodeId, Vec<NodeId>> {
    if n < 3 {
        return line_topology(n);
    }
    (0..n)
        .map(|i| (node(i), vec![node((i + n - 1) % n), node((i + 1) % n)]))
        .collect()
}

/// `n0` is the hub; every other node is a leaf.
pub fn star_topology(n: usize) -> HashMap<NodeId, Vec<NodeId>> {
    let mut mapping: HashMap<NodeId, Vec<NodeId>> =
        (1..n).map(|i| (node(i), vec![node(0)])).collect();
    mapping.insert(node(0), (1..n).map(node).collect());
    mapping
}

/// Every node neighbors every other node.
pub fn full_topology(n: usize) -> HashMap<NodeId, Vec<NodeId>> {
    (0..n)
        .map(|i| (node(i), (0..n).filter(|j| *j != i).map(node).collect()))
        .collect()
}

/// Counters describing what the simulated network did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub delivered: u64,
    pub lost: u64,
    pub cut: u64,
}

/// Shared medium connecting all simulated nodes.
pub struct SimNetwork {
    engines: RwLock<HashMap<NodeId, Arc<BroadcastEngine>>>,
    cut_links: RwLock<HashSet<(NodeId, NodeId)>>,
    loss_rate: f64,
    rng: Mutex<StdRng>,
    delivered: AtomicU64,
    lost: AtomicU64,
    cut: AtomicU64,
}

impl SimNetwork {
    /// A non-finite `loss_rate` counts as a lossless network.
    pub fn new(loss_rate: f64, seed: u64) -> Self {
        let loss_rate = if loss_rate.is_finite() { loss_rate } else { 0.0 };
        Self {
            engines: RwLock::new(HashMap::new()),
            cut_links: RwLock::new(HashSet::new()),
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            delivered: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            cut: AtomicU64::new(0),
        }
    }

    fn engine(&self, id: &NodeId) -> Option<Arc<BroadcastEngine>> {
        self.engines.read().get(id).cloned()
    }

    /// Whether a message from `from` to `to` gets through right now.
    fn passes(&self, from: &NodeId, to: &NodeId) -> bool {
        if self.cut_links.read().contains(&(from.clone(), to.clone())) {
            self.cut.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.loss_rate > 0.0 && self.rng.lock().gen_bool(self.loss_rate) {
            self.lost.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            cut: self.cut.load(Ordering::Relaxed),
        }
    }
}

/// Courier that routes relays through a [`SimNetwork`].
pub struct MemoryCourier {
    from: NodeId,
    network: Arc<SimNetwork>,
}

impl MemoryCourier {
    pub fn new(from: NodeId, network: Arc<SimNetwork>) -> Self {
        Self { from, network }
    }
}

#[async_trait]
impl Courier for MemoryCourier {
    async fn deliver(
        &self,
        to: &NodeId,
        relay: &Relay,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        let target = self
            .network
            .engine(to)
            .ok_or_else(|| DeliveryError::Unreachable(to.to_string()))?;

        if !self.network.passes(&self.from, to) {
            tokio::time::sleep(timeout).await;
            return Err(DeliveryError::TimedOut);
        }
        let receipt = target.accept_relay(&self.from, relay.clone()).await;
        self.network.delivered.fetch_add(1, Ordering::Relaxed);

        if !self.network.passes(to, &self.from) {
            tokio::time::sleep(timeout).await;
            return Err(DeliveryError::TimedOut);
        }
        if receipt.mid() == relay.mid {
            Ok(())
        } else {
            Err(DeliveryError::Rejected(format!(
                "acknowledged {} instead of {}",
                receipt.mid(),
                relay.mid
            )))
        }
    }
}

/// A running cluster of engines wired through one [`SimNetwork`].
pub struct Cluster {
    engines: BTreeMap<NodeId, Arc<BroadcastEngine>>,
    workers: Vec<Workers>,
    network: Arc<SimNetwork>,
}

impl Cluster {
    /// Start one engine per node of `topology` and install the topology.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        topology: &HashMap<NodeId, Vec<NodeId>>,
        config: &BroadcastConfig,
        loss_rate: f64,
        seed: u64,
    ) -> Self {
        let network = Arc::new(SimNetwork::new(loss_rate, seed));
        let mut engines = BTreeMap::new();
        let mut workers = Vec::new();

        for id in topology.keys() {
            let courier = Arc::new(MemoryCourier::new(id.clone(), Arc::clone(&network)));
            let (engine, handles) = BroadcastEngine::start(id.clone(), config, courier);
            engine.set_topology(topology);
            network.engines.write().insert(id.clone(), Arc::clone(&engine));
            engines.insert(id.clone(), engine);
            workers.push(handles);
        }

        Self {
            engines,
            workers,
            network,
        }
    }

    pub fn engine(&self, id: &NodeId) -> Option<&Arc<BroadcastEngine>> {
        self.engines.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.engines.keys()
    }

    /// Have a client broadcast `value` at node `at`.
    pub async fn broadcast(&self, at: &NodeId, value: Value) -> Option<Receipt> {
        let engine = self.engines.get(at)?;
        Some(engine.accept_client(value).await)
    }

    /// Cut the link between `a` and `b` in both directions.
    pub fn partition(&self, a: &NodeId, b: &NodeId) {
        let mut cut = self.network.cut_links.write();
        cut.insert((a.clone(), b.clone()));
        cut.insert((b.clone(), a.clone()));
    }

    /// Isolate `id` from every other node.
    pub fn isolate(&self, id: &NodeId) {
        for other in self.engines.keys().filter(|n| *n != id) {
            self.partition(id, other);
        }
    }

    pub fn heal_all(&self) {
        self.network.cut_links.write().clear();
    }

    /// Outstanding deliveries across the whole cluster.
    pub fn pending_total(&self) -> usize {
        self.engines.values().map(|e| e.pending().len()).sum()
    }

    /// Whether every node holds exactly `values`, in any order.
    pub fn has_converged_on(&self, values: &[Value]) -> bool {
        let mut expected = values.to_vec();
        expected.sort_unstable();
        self.engines.values().all(|engine| {
            let mut snapshot = engine.snapshot();
            snapshot.sort_unstable();
            snapshot == expected
        })
    }

    /// Advance time in `step`s until the cluster holds `values` everywhere
    /// and no delivery is outstanding, or `limit` elapses.
    pub async fn settle(&self, values: &[Value], step: Duration, limit: Duration) -> bool {
        let mut waited = Duration::ZERO;
        loop {
            if self.has_converged_on(values) && self.pending_total() == 0 {
                return true;
            }
            if waited >= limit {
                return false;
            }
            tokio::time::sleep(step).await;
            waited += step;
        }
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.network.stats()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for workers in &self.workers {
            workers.abort();
        }
        self.network.engines.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BroadcastConfig {
        BroadcastConfig {
            retry_interval: Duration::from_millis(500),
            delivery_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[test]
    fn test_topology_shapes() {
        let line = line_topology(3);
        assert_eq!(line[&node(1)], vec![node(0), node(2)]);
        assert_eq!(line[&node(0)], vec![node(1)]);

        let ring = ring_topology(4);
        assert_eq!(ring[&node(0)], vec![node(3), node(1)]);

        let star = star_topology(4);
        assert_eq!(star[&node(0)].len(), 3);
        assert_eq!(star[&node(2)], vec![node(0)]);

        let full = full_topology(4);
        assert!(full.values().all(|n| n.len() == 3));
    }

    #[test]
    fn test_loss_rate_is_sanitized() {
        let network = SimNetwork::new(f64::NAN, 1);
        assert_eq!(network.loss_rate, 0.0);
        assert!(network.passes(&node(0), &node(1)));

        assert_eq!(SimNetwork::new(f64::INFINITY, 1).loss_rate, 0.0);
        assert_eq!(SimNetwork::new(1.5, 1).loss_rate, 1.0);
        assert_eq!(SimNetwork::new(-0.5, 1).loss_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reliable_network_converges() {
        let cluster = Cluster::start(&line_topology(4), &fast_config(), 0.0, 1);
        cluster.broadcast(&node(0), 42).await;

        assert!(
            cluster
                .settle(&[42], Duration::from_millis(50), Duration::from_secs(5))
                .await
        );
        assert_eq!(cluster.network_stats().lost, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolated_node_catches_up_after_heal() {
        let cluster = Cluster::start(&ring_topology(5), &fast_config(), 0.0, 2);
        cluster.isolate(&node(3));
        cluster.broadcast(&node(0), 7).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        let isolated = cluster.engine(&node(3)).unwrap();
        assert!(isolated.snapshot().is_empty());
        assert!(cluster.pending_total() > 0);

        cluster.heal_all();
        assert!(
            cluster
                .settle(&[7], Duration::from_millis(100), Duration::from_secs(10))
                .await
        );
    }
}
