//! # murmur
//!
//! A gossip-broadcast node for a simulated cluster. Values broadcast by
//! clients at any node reach every node of a connected topology, despite
//! lost messages and temporary partitions.
//!
//! The node reads one JSON message per line on stdin and writes its replies
//! and peer traffic to stdout. The crates underneath:
//!
//! - `murmur-core` - identifiers, topology, value store and deduplicator
//! - `murmur-broadcast` - the engine, pending acknowledgments and retries
//! - `murmur-node` - the JSON runtime
//!
//! This crate wires them together and adds configuration and logging.

pub mod config;
pub mod logging;
pub mod services;

pub use config::{ConfigError, LogConfig, LogFormat, NodeConfig};
pub use services::{install, NodeCourier};

use murmur_broadcast::BroadcastEngine;
use murmur_node::{Node, Result, Transport};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::info;

/// Bootstrap from `input`, serve until it closes, then stop the workers.
pub async fn run<R>(config: &NodeConfig, input: R, transport: Arc<dyn Transport>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let node = Node::bootstrap(&mut lines, transport).await?;

    let courier = Arc::new(NodeCourier::new(Arc::clone(&node)));
    let (engine, workers) = BroadcastEngine::start(node.id().clone(), &config.broadcast, courier);
    install(&node, &engine);

    let served = node.serve(lines).await;
    workers.abort();
    info!(node = %node.id(), stats = ?engine.stats(), "stopped");
    served
}
