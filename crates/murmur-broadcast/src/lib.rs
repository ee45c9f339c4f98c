//! # murmur-broadcast
//!
//! Reliable gossip broadcast over an arbitrary neighbor graph.
//!
//! This crate provides:
//! - [`BroadcastEngine`], which stores client values, suppresses duplicate
//!   relays and fans new relays out to neighbors that have not seen them
//! - [`PendingTable`], the set of deliveries still awaiting acknowledgment
//! - a dispatcher that performs each delivery through a [`Courier`] and a
//!   sweeper that periodically re-enqueues everything still pending
//! - [`sim`], an in-memory cluster with seeded loss and partitions
//!
//! ## Delivery model
//!
//! Every relay carries the set of nodes already known to hold it
//! (`already_got`). A node relays only to neighbors outside that set and
//! never back to the sender. Deliveries stay in the pending table until the
//! recipient acknowledges them, so a lost relay or a lost reply is resent
//! on the next sweep. Recipients acknowledge duplicates too.
//!
//! ## Example
//!
//! ```rust
//! use murmur_broadcast::{BroadcastConfig, BroadcastEngine};
//! use murmur_core::NodeId;
//! use std::collections::HashMap;
//!
//! # tokio_test::block_on(async {
//! let (engine, _queue) = BroadcastEngine::new("n1".into(), &BroadcastConfig::default());
//!
//! let mut topology = HashMap::new();
//! topology.insert(NodeId::from("n1"), vec![NodeId::from("n2")]);
//! engine.set_topology(&topology);
//!
//! let receipt = engine.accept_client(42).await;
//! assert_eq!(receipt.fanout(), 1);
//! assert_eq!(engine.snapshot(), vec![42]);
//! assert_eq!(engine.pending().len(), 1);
//! # });
//! ```

pub mod config;
pub mod engine;
pub mod pending;
pub mod relay;
pub mod sim;
pub mod worker;

pub use config::{BroadcastConfig, BroadcastConfigBuilder};
pub use engine::{BroadcastEngine, BroadcastStats, Receipt};
pub use pending::PendingTable;
pub use relay::{Delivery, Relay};
pub use worker::{spawn_workers, Courier, DeliveryError, Workers};
