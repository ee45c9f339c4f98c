//! # murmur-node
//!
//! Runtime for a node that speaks line-delimited JSON over stdin/stdout.
//!
//! - [`protocol`] - the message envelope and every payload type
//! - [`transport`] - the outbound [`Transport`] seam, with stdout and
//!   in-memory implementations
//! - [`node`] - bootstrap from `init`, the handler registry, and
//!   request/reply correlation for [`Node::call`]
//! - [`error`] - error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use murmur_node::{Message, Node, Payload, StdioTransport};
//! use std::sync::Arc;
//! use tokio::io::{AsyncBufReadExt, BufReader};
//!
//! # async fn run() -> murmur_node::Result<()> {
//! let mut lines = BufReader::new(tokio::io::stdin()).lines();
//! let node = Node::bootstrap(&mut lines, Arc::new(StdioTransport::stdout())).await?;
//!
//! node.handle("echo", |node: Arc<Node>, msg: Message| async move {
//!     if let Payload::Echo { echo } = &msg.body.payload {
//!         node.reply(&msg, Payload::EchoOk { echo: echo.clone() }).await?;
//!     }
//!     Ok(())
//! });
//! node.serve(lines).await
//! # }
//! ```
//!
//! In tests, a [`MemoryTransport`] collects whatever the node sends:
//!
//! ```rust
//! use murmur_node::{MemoryTransport, Node, Payload};
//! use std::sync::Arc;
//! use tokio::io::{AsyncBufReadExt, BufReader};
//!
//! # tokio_test::block_on(async {
//! let (transport, mut outbox) = MemoryTransport::new();
//! let node = Node::new("n1".into(), vec!["n1".into()], Arc::new(transport));
//!
//! let input = r#"{"src":"c1","dest":"n1","body":{"type":"cas","msg_id":1}}"#;
//! node.serve(BufReader::new(input.as_bytes()).lines()).await.unwrap();
//!
//! let reply = outbox.recv().await.unwrap();
//! assert_eq!(reply.body.in_reply_to, Some(1));
//! assert_eq!(reply.body.payload, Payload::not_supported());
//! # });
//! ```

pub mod error;
pub mod node;
pub mod protocol;
pub mod transport;

pub use error::{NodeError, Result};
pub use node::{Handler, Node};
pub use protocol::{Body, Message, Payload, NOT_SUPPORTED};
pub use transport::{MemoryTransport, StdioTransport, Transport};
