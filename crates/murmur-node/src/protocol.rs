//! Wire format: one JSON message per line.
//!
//! ```text
//! {"src":"c1","dest":"n1","body":{"type":"broadcast","msg_id":3,"message":7}}
//! ```

use crate::error::Result;
use murmur_core::{MessageId, NodeId, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Error code for a message type the node does not handle.
pub const NOT_SUPPORTED: u32 = 10;

/// A message envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

impl Message {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Serialize to a single line, without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether this message answers an earlier request.
    pub fn is_reply(&self) -> bool {
        self.body.in_reply_to.is_some()
    }

    pub fn kind(&self) -> &'static str {
        self.body.payload.kind()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Every message type the node speaks, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,
    Topology {
        topology: HashMap<NodeId, Vec<NodeId>>,
    },
    TopologyOk,
    /// A client broadcast carries only `message`; relays also carry the
    /// broadcast id and the already-notified set.
    Broadcast {
        message: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mid: Option<MessageId>,
        #[serde(
            rename = "alreadyGot",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        already_got: Option<BTreeSet<NodeId>>,
    },
    BroadcastOk,
    BroadcastFine {
        mid: MessageId,
    },
    Read,
    ReadOk {
        messages: Vec<Value>,
    },
    Echo {
        echo: serde_json::Value,
    },
    EchoOk {
        echo: serde_json::Value,
    },
    Generate,
    GenerateOk {
        id: String,
    },
    Error {
        code: u32,
        text: String,
    },
    /// Any type not listed above.
    #[serde(other)]
    Unsupported,
}

impl Payload {
    /// The `type` tag, used to look up handlers.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Init { .. } => "init",
            Payload::InitOk => "init_ok",
            Payload::Topology { .. } => "topology",
            Payload::TopologyOk => "topology_ok",
            Payload::Broadcast { .. } => "broadcast",
            Payload::BroadcastOk => "broadcast_ok",
            Payload::BroadcastFine { .. } => "broadcast_fine",
            Payload::Read => "read",
            Payload::ReadOk { .. } => "read_ok",
            Payload::Echo { .. } => "echo",
            Payload::EchoOk { .. } => "echo_ok",
            Payload::Generate => "generate",
            Payload::GenerateOk { .. } => "generate_ok",
            Payload::Error { .. } => "error",
            Payload::Unsupported => "unsupported",
        }
    }

    pub fn not_supported() -> Self {
        Payload::Error {
            code: NOT_SUPPORTED,
            text: "not supported".to_string(),
        }
    }
}
