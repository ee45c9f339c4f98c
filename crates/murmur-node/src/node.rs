//! The node runtime: bootstrap, handler registry, request/reply correlation.

use crate::error::{NodeError, Result};
use crate::protocol::{Body, Message, Payload};
use crate::transport::Transport;
use async_trait::async_trait;
use murmur_core::{NodeId, Origin};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Handles every inbound message of one type.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, node: Arc<Node>, message: Message) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Arc<Node>, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, node: Arc<Node>, message: Message) -> Result<()> {
        (self)(node, message).await
    }
}

/// A node bound to the identity it was given at `init`.
pub struct Node {
    id: NodeId,
    node_ids: Vec<NodeId>,
    members: HashSet<NodeId>,
    transport: Arc<dyn Transport>,
    next_msg_id: AtomicU64,
    waiters: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    handlers: RwLock<HashMap<&'static str, Arc<dyn Handler>>>,
}

impl Node {
    pub fn new(id: NodeId, node_ids: Vec<NodeId>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let members = node_ids.iter().cloned().collect();
        Arc::new(Self {
            id,
            node_ids,
            members,
            transport,
            next_msg_id: AtomicU64::new(0),
            waiters: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        })
    }

    /// Read the `init` message, answer `init_ok` and build the node.
    ///
    /// Blank lines before `init` are skipped; any other first message is an
    /// error.
    pub async fn bootstrap<R>(lines: &mut Lines<R>, transport: Arc<dyn Transport>) -> Result<Arc<Self>>
    where
        R: AsyncBufRead + Unpin,
    {
        let init = loop {
            match lines.next_line().await? {
                None => return Err(NodeError::NotInitialized),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break Message::parse(&line)?,
            }
        };

        let (id, node_ids) = match &init.body.payload {
            Payload::Init { node_id, node_ids } => (node_id.clone(), node_ids.clone()),
            other => return Err(NodeError::UnexpectedFirstMessage(other.kind().to_string())),
        };

        let node = Self::new(id, node_ids, transport);
        node.reply(&init, Payload::InitOk).await?;
        info!(node = %node.id, cluster = node.node_ids.len(), "initialized");
        Ok(node)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Every node in the cluster, including this one.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    /// Peers are cluster members; everything else is a client.
    pub fn origin_of(&self, src: &NodeId) -> Origin {
        if self.members.contains(src) {
            Origin::Peer
        } else {
            Origin::Client
        }
    }

    /// Register the handler for messages of type `kind`, replacing any
    /// earlier one.
    pub fn handle<F, Fut>(&self, kind: &'static str, handler: F)
    where
        F: Fn(Arc<Node>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handle_with(kind, handler);
    }

    /// [`Node::handle`] for any [`Handler`] implementation.
    pub fn handle_with<H: Handler>(&self, kind: &'static str, handler: H) {
        self.handlers.write().insert(kind, Arc::new(handler));
    }

    fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn envelope(&self, dest: NodeId, msg_id: Option<u64>, in_reply_to: Option<u64>, payload: Payload) -> Message {
        Message {
            src: self.id.clone(),
            dest,
            body: Body {
                msg_id,
                in_reply_to,
                payload,
            },
        }
    }

    /// Fire-and-forget.
    pub async fn send(&self, dest: &NodeId, payload: Payload) -> Result<()> {
        let message = self.envelope(dest.clone(), None, None, payload);
        self.transport.send(message).await
    }

    /// Answer `request`.
    pub async fn reply(&self, request: &Message, payload: Payload) -> Result<()> {
        let message = self.envelope(
            request.src.clone(),
            Some(self.next_msg_id()),
            request.body.msg_id,
            payload,
        );
        self.transport.send(message).await
    }

    /// Send a request and wait up to `timeout` for its reply.
    ///
    /// An `error` reply becomes [`NodeError::Rpc`]. On timeout the waiter is
    /// removed, so a late reply is routed to the handler for its type.
    pub async fn call(&self, dest: &NodeId, payload: Payload, timeout: Duration) -> Result<Message> {
        let msg_id = self.next_msg_id();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(msg_id, tx);

        let message = self.envelope(dest.clone(), Some(msg_id), None, payload);
        if let Err(err) = self.transport.send(message).await {
            self.waiters.lock().remove(&msg_id);
            return Err(err);
        }

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(NodeError::Closed),
            Err(_) => {
                self.waiters.lock().remove(&msg_id);
                return Err(NodeError::Timeout { dest: dest.clone() });
            }
        };
        if let Payload::Error { code, text } = &reply.body.payload {
            return Err(NodeError::Rpc {
                code: *code,
                text: text.clone(),
            });
        }
        Ok(reply)
    }

    /// [`Node::call`], failing with [`NodeError::UnexpectedReply`] unless the
    /// reply has type `expected`.
    pub async fn call_expecting(
        &self,
        dest: &NodeId,
        payload: Payload,
        expected: &'static str,
        timeout: Duration,
    ) -> Result<Message> {
        let reply = self.call(dest, payload, timeout).await?;
        if reply.kind() != expected {
            return Err(NodeError::UnexpectedReply(format!(
                "expected {} from {}, got {}",
                expected,
                dest,
                reply.kind()
            )));
        }
        Ok(reply)
    }

    /// Requests still waiting for a reply.
    pub fn outstanding_calls(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Read messages until the input closes.
    ///
    /// Replies go to their waiting [`Node::call`]; every other message runs
    /// its handler in a task of its own. Malformed lines are logged and
    /// dropped.
    pub async fn serve<R>(self: &Arc<Self>, mut lines: Lines<R>) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match Message::parse(&line) {
                Ok(message) => self.route(message),
                Err(err) => warn!(node = %self.id, error = %err, %line, "dropping malformed message"),
            }
        }
        info!(node = %self.id, "input closed");
        Ok(())
    }

    fn route(self: &Arc<Self>, message: Message) {
        let message = match message.body.in_reply_to {
            Some(in_reply_to) => {
                let waiter = self.waiters.lock().remove(&in_reply_to);
                match waiter {
                    // A waiter that timed out concurrently hands the reply back.
                    Some(waiter) => match waiter.send(message) {
                        Ok(()) => return,
                        Err(message) => message,
                    },
                    None => message,
                }
            }
            None => message,
        };

        let node = Arc::clone(self);
        tokio::spawn(async move { node.dispatch(message).await });
    }

    async fn dispatch(self: Arc<Self>, message: Message) {
        let kind = message.kind();
        let handler = self.handlers.read().get(kind).cloned();

        match handler {
            Some(handler) => {
                let src = message.src.clone();
                if let Err(err) = handler.handle(Arc::clone(&self), message).await {
                    warn!(node = %self.id, %src, kind, error = %err, "handler failed");
                }
            }
            None if message.body.msg_id.is_some() && !message.is_reply() => {
                debug!(node = %self.id, src = %message.src, kind, "no handler; answering not supported");
                if let Err(err) = self.reply(&message, Payload::not_supported()).await {
                    warn!(node = %self.id, error = %err, "failed to answer unsupported message");
                }
            }
            None => {
                debug!(node = %self.id, src = %message.src, kind, "no handler; dropped");
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("node_ids", &self.node_ids)
            .field("outstanding_calls", &self.outstanding_calls())
            .finish()
    }
}
