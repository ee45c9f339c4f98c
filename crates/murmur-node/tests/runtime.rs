//! The runtime driven through in-memory pipes, as a harness would drive it
//! through stdin and stdout.

use murmur_node::{Message, Node, NodeError, Payload, StdioTransport};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;

struct Harness {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
}

impl Harness {
    async fn send(&mut self, value: Value) {
        self.send_raw(&value.to_string()).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.input.write_all(line.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
            .await
            .expect("no output")
            .unwrap()
            .expect("output closed");
        serde_json::from_str(&line).unwrap()
    }
}

/// Bootstrap a node as `n1` of `[n1, n2]`, register `setup`'s handlers and
/// serve in the background.
async fn start(setup: impl FnOnce(&Arc<Node>)) -> (Harness, Arc<Node>, JoinHandle<murmur_node::Result<()>>) {
    let (input, node_in) = tokio::io::duplex(4096);
    let (node_out, output) = tokio::io::duplex(4096);
    let mut harness = Harness {
        input,
        output: BufReader::new(output).lines(),
    };

    harness
        .send(json!({"src": "c0", "dest": "n1", "body": {"type": "init", "msg_id": 1, "node_id": "n1", "node_ids": ["n1", "n2"]}}))
        .await;

    let mut lines = BufReader::new(node_in).lines();
    let node = Node::bootstrap(&mut lines, Arc::new(StdioTransport::with_writer(node_out)))
        .await
        .unwrap();
    setup(&node);

    let server = Arc::clone(&node);
    let serving = tokio::spawn(async move { server.serve(lines).await });
    (harness, node, serving)
}

fn echo_handler(node: &Arc<Node>) {
    node.handle("echo", |node: Arc<Node>, msg: Message| async move {
        if let Payload::Echo { echo } = &msg.body.payload {
            node.reply(&msg, Payload::EchoOk { echo: echo.clone() }).await?;
        }
        Ok(())
    });
}

#[tokio::test]
async fn test_init_is_acknowledged() {
    let (mut harness, node, _serving) = start(|_| {}).await;

    let init_ok = harness.recv().await;
    assert_eq!(init_ok["src"], "n1");
    assert_eq!(init_ok["dest"], "c0");
    assert_eq!(init_ok["body"]["type"], "init_ok");
    assert_eq!(init_ok["body"]["in_reply_to"], 1);

    assert_eq!(node.id().as_str(), "n1");
    assert_eq!(node.node_ids().len(), 2);
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (mut harness, _node, _serving) = start(echo_handler).await;
    harness.recv().await;

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "echo", "msg_id": 5, "echo": {"nested": [1, 2]}}}))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["dest"], "c1");
    assert_eq!(reply["body"]["type"], "echo_ok");
    assert_eq!(reply["body"]["in_reply_to"], 5);
    assert_eq!(reply["body"]["echo"], json!({"nested": [1, 2]}));
}

#[tokio::test]
async fn test_malformed_line_is_dropped_and_serving_continues() {
    let (mut harness, _node, serving) = start(echo_handler).await;
    harness.recv().await;

    harness.send_raw("{ this is not json").await;
    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 2}}))
        .await;
    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "echo", "msg_id": 3, "echo": "still here"}}))
        .await;

    let reply = harness.recv().await;
    assert_eq!(reply["body"]["in_reply_to"], 3);
    assert!(!serving.is_finished());
}

#[tokio::test]
async fn test_unknown_type_is_not_supported() {
    let (mut harness, _node, _serving) = start(|_| {}).await;
    harness.recv().await;

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "cas", "msg_id": 4, "key": 1}}))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["body"]["type"], "error");
    assert_eq!(reply["body"]["code"], 10);
    assert_eq!(reply["body"]["in_reply_to"], 4);
}

#[tokio::test]
async fn test_call_is_answered_through_the_pipe() {
    let (mut harness, node, _serving) = start(|_| {}).await;
    harness.recv().await;

    let caller = Arc::clone(&node);
    let call = tokio::spawn(async move {
        caller
            .call(&"n2".into(), Payload::Read, Duration::from_secs(5))
            .await
    });

    let request = harness.recv().await;
    assert_eq!(request["dest"], "n2");
    assert_eq!(request["body"]["type"], "read");
    let msg_id = request["body"]["msg_id"].as_u64().unwrap();

    harness
        .send(json!({"src": "n2", "dest": "n1", "body": {"type": "read_ok", "in_reply_to": msg_id, "messages": [3, 1]}}))
        .await;
    let reply = call.await.unwrap().unwrap();
    assert_eq!(reply.body.payload, Payload::ReadOk { messages: vec![3, 1] });
}

#[tokio::test]
async fn test_serve_returns_when_input_closes() {
    let (harness, _node, serving) = start(|_| {}).await;
    drop(harness);
    assert!(serving.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_first_message_must_be_init() {
    let (mut input, node_in) = tokio::io::duplex(1024);
    input
        .write_all(b"{\"src\":\"c1\",\"dest\":\"n1\",\"body\":{\"type\":\"read\",\"msg_id\":1}}\n")
        .await
        .unwrap();

    let (_out, node_out) = tokio::io::duplex(1024);
    let mut lines = BufReader::new(node_in).lines();
    let result = Node::bootstrap(&mut lines, Arc::new(StdioTransport::with_writer(node_out))).await;
    assert!(matches!(result, Err(NodeError::UnexpectedFirstMessage(kind)) if kind == "read"));
}

#[tokio::test]
async fn test_closed_input_before_init() {
    let (input, node_in) = tokio::io::duplex(1024);
    drop(input);

    let (_out, node_out) = tokio::io::duplex(1024);
    let mut lines = BufReader::new(node_in).lines();
    let result = Node::bootstrap(&mut lines, Arc::new(StdioTransport::with_writer(node_out))).await;
    assert!(matches!(result, Err(NodeError::NotInitialized)));
}
