//! # murmur-core
//!
//! Shared state primitives for a single Murmur node.
//!
//! Every resource here is independently guarded; none of them takes a
//! node-wide lock, so mutating one never blocks readers of another.
//!
//! - [`id`] - node identities, broadcast message ids, message origins
//! - [`topology`] - the local neighbor list, replaced wholesale
//! - [`store`] - the append-only value log served to `read`
//! - [`dedup`] - the known-message-id set with an atomic check-and-mark
//!
//! ## Example
//!
//! ```rust
//! use murmur_core::{Deduplicator, MessageId, ValueStore};
//!
//! let store = ValueStore::new();
//! let dedup = Deduplicator::new();
//!
//! let mid = MessageId::generate();
//! if dedup.check_and_mark(&mid) {
//!     store.append(7);
//! }
//! // A re-delivery of the same broadcast is suppressed.
//! assert!(!dedup.check_and_mark(&mid));
//! assert_eq!(store.snapshot(), vec![7]);
//! ```

pub mod dedup;
pub mod id;
pub mod store;
pub mod topology;

pub use dedup::Deduplicator;
pub use id::{MessageId, NodeId, Origin, Value};
pub use store::ValueStore;
pub use topology::Topology;
