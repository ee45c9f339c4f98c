//! Wiring between the broadcast engine and the JSON runtime.

use async_trait::async_trait;
use murmur_broadcast::{BroadcastEngine, Courier, DeliveryError, Relay};
use murmur_core::{NodeId, Origin};
use murmur_node::{Message, Node, NodeError, Payload, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Delivers relays to peers as `broadcast` requests answered by
/// `broadcast_fine`.
pub struct NodeCourier {
    node: Arc<Node>,
}

impl NodeCourier {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl Courier for NodeCourier {
    async fn deliver(
        &self,
        to: &NodeId,
        relay: &Relay,
        timeout: Duration,
    ) -> std::result::Result<(), DeliveryError> {
        let request = Payload::Broadcast {
            message: relay.value,
            mid: Some(relay.mid),
            already_got: Some(relay.already_got.clone()),
        };

        let reply = self
            .node
            .call_expecting(to, request, "broadcast_fine", timeout)
            .await
            .map_err(|err| match err {
                NodeError::Timeout { .. } => DeliveryError::TimedOut,
                NodeError::Rpc { .. } | NodeError::UnexpectedReply(_) => {
                    DeliveryError::Rejected(err.to_string())
                }
                other => DeliveryError::Unreachable(other.to_string()),
            })?;

        match reply.body.payload {
            Payload::BroadcastFine { mid } if mid == relay.mid => Ok(()),
            Payload::BroadcastFine { mid } => Err(DeliveryError::Rejected(format!(
                "acknowledged {} instead of {}",
                mid, relay.mid
            ))),
            other => Err(DeliveryError::Rejected(other.kind().to_string())),
        }
    }
}

/// Register every message handler on `node`.
pub fn install(node: &Arc<Node>, engine: &Arc<BroadcastEngine>) {
    let e = Arc::clone(engine);
    node.handle("topology", move |node: Arc<Node>, msg: Message| {
        let engine = Arc::clone(&e);
        async move {
            if let Payload::Topology { topology } = &msg.body.payload {
                engine.set_topology(topology);
                node.reply(&msg, Payload::TopologyOk).await?;
            }
            Ok(())
        }
    });

    let e = Arc::clone(engine);
    node.handle("broadcast", move |node: Arc<Node>, msg: Message| {
        let engine = Arc::clone(&e);
        async move { broadcast(&node, &engine, msg).await }
    });

    let e = Arc::clone(engine);
    node.handle("read", move |node: Arc<Node>, msg: Message| {
        let engine = Arc::clone(&e);
        async move {
            let messages = engine.snapshot();
            node.reply(&msg, Payload::ReadOk { messages }).await
        }
    });

    // Acknowledgments that outlived their delivery attempt.
    let e = Arc::clone(engine);
    node.handle("broadcast_fine", move |_node: Arc<Node>, msg: Message| {
        let engine = Arc::clone(&e);
        async move {
            if let Payload::BroadcastFine { mid } = &msg.body.payload {
                let cleared = engine.acknowledge(&msg.src, mid);
                debug!(src = %msg.src, %mid, cleared, "late acknowledgment");
            }
            Ok(())
        }
    });

    node.handle("echo", |node: Arc<Node>, msg: Message| async move {
        if let Payload::Echo { echo } = &msg.body.payload {
            node.reply(&msg, Payload::EchoOk { echo: echo.clone() }).await?;
        }
        Ok(())
    });

    node.handle("generate", |node: Arc<Node>, msg: Message| async move {
        let id = ulid::Ulid::new().to_string();
        node.reply(&msg, Payload::GenerateOk { id }).await
    });
}

async fn broadcast(node: &Node, engine: &BroadcastEngine, msg: Message) -> Result<()> {
    let Payload::Broadcast {
        message,
        mid,
        already_got,
    } = &msg.body.payload
    else {
        return Ok(());
    };

    match (node.origin_of(&msg.src), mid) {
        (Origin::Peer, Some(mid)) => {
            let relay = Relay::new(*message, *mid).with_already_got(already_got.iter().flatten().cloned());
            let receipt = engine.accept_relay(&msg.src, relay).await;
            node.reply(&msg, Payload::BroadcastFine { mid: receipt.mid() })
                .await
        }
        _ => {
            engine.accept_client(*message).await;
            node.reply(&msg, Payload::BroadcastOk).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_broadcast::BroadcastConfig;
    use murmur_core::MessageId;
    use murmur_node::{Body, MemoryTransport};
    use std::collections::HashMap;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::mpsc;

    fn setup() -> (
        Arc<Node>,
        Arc<BroadcastEngine>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (transport, outbox) = MemoryTransport::new();
        let node = Node::new(
            "A".into(),
            vec!["A".into(), "B".into(), "C".into()],
            Arc::new(transport),
        );
        let (engine, _queue) = BroadcastEngine::new("A".into(), &BroadcastConfig::default());
        let engine = Arc::new(engine);
        let mut topology = HashMap::new();
        topology.insert(NodeId::from("A"), vec![NodeId::from("B"), NodeId::from("C")]);
        engine.set_topology(&topology);
        (node, engine, outbox)
    }

    fn request(src: &str, payload: Payload) -> Message {
        Message {
            src: src.into(),
            dest: "A".into(),
            body: Body {
                msg_id: Some(1),
                in_reply_to: None,
                payload,
            },
        }
    }

    #[tokio::test]
    async fn test_client_broadcast_gets_broadcast_ok() {
        let (node, engine, mut outbox) = setup();
        let msg = request(
            "c1",
            Payload::Broadcast {
                message: 7,
                mid: None,
                already_got: None,
            },
        );

        broadcast(&node, &engine, msg).await.unwrap();
        assert_eq!(engine.snapshot(), vec![7]);
        assert_eq!(engine.pending().len(), 2);
        assert_eq!(outbox.recv().await.unwrap().body.payload, Payload::BroadcastOk);
    }

    #[tokio::test]
    async fn test_peer_relay_and_duplicate_get_broadcast_fine() {
        let (node, engine, mut outbox) = setup();
        let mid = MessageId::generate();
        let relay = || {
            request(
                "B",
                Payload::Broadcast {
                    message: 7,
                    mid: Some(mid),
                    already_got: Some(
                        ["A", "B", "C"].iter().map(|n| NodeId::from(*n)).collect(),
                    ),
                },
            )
        };

        broadcast(&node, &engine, relay()).await.unwrap();
        broadcast(&node, &engine, relay()).await.unwrap();

        assert_eq!(engine.snapshot(), vec![7]);
        assert!(engine.pending().is_empty());
        for _ in 0..2 {
            assert_eq!(
                outbox.recv().await.unwrap().body.payload,
                Payload::BroadcastFine { mid }
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_sender_with_mid_is_a_client() {
        let (node, engine, mut outbox) = setup();
        let msg = request(
            "n9",
            Payload::Broadcast {
                message: 3,
                mid: Some(MessageId::generate()),
                already_got: None,
            },
        );

        broadcast(&node, &engine, msg).await.unwrap();
        assert_eq!(outbox.recv().await.unwrap().body.payload, Payload::BroadcastOk);
        assert_eq!(engine.stats().client_broadcasts, 1);
    }

    #[tokio::test]
    async fn test_peer_broadcast_without_mid_is_a_client() {
        let (node, engine, mut outbox) = setup();
        let msg = request(
            "B",
            Payload::Broadcast {
                message: 5,
                mid: None,
                already_got: None,
            },
        );

        broadcast(&node, &engine, msg).await.unwrap();
        assert_eq!(outbox.recv().await.unwrap().body.payload, Payload::BroadcastOk);
        assert_eq!(engine.stats().client_broadcasts, 1);

        let to_c: Vec<_> = engine
            .pending()
            .snapshot()
            .into_iter()
            .filter(|d| d.to == NodeId::from("C"))
            .collect();
        assert_eq!(to_c.len(), 1);
        assert_eq!(to_c[0].relay.value, 5);
        assert!(engine.is_known(&to_c[0].relay.mid));
    }

    #[tokio::test]
    async fn test_late_broadcast_fine_clears_pending() {
        let (node, engine, _outbox) = setup();
        install(&node, &engine);

        let mid = engine.accept_client(9).await.mid();
        assert_eq!(engine.pending().len(), 2);

        // Neither reply has a waiter left on this node.
        let mut input = String::new();
        for (src, in_reply_to) in [("B", 999), ("C", 1000)] {
            let ack = Message {
                src: src.into(),
                dest: "A".into(),
                body: Body {
                    msg_id: None,
                    in_reply_to: Some(in_reply_to),
                    payload: Payload::BroadcastFine { mid },
                },
            };
            input.push_str(&ack.to_line().unwrap());
            input.push('\n');
        }
        node.serve(BufReader::new(input.as_bytes()).lines())
            .await
            .unwrap();

        for _ in 0..100 {
            if engine.pending().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(engine.pending().is_empty());
        assert_eq!(node.outstanding_calls(), 0);
    }
}
