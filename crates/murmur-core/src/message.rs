//! Wire messages exchanged between nodes and clients.
//!
//! Every message is a JSON object with a source, a destination and a body.
//! The body always carries a `type` discriminator; everything else is kept
//! as a flattened map so that handlers can pick the fields they understand
//! and `echo` can mirror the rest untouched.

use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a node or client (`n1`, `c3`, ...).
pub type NodeId = String;

/// Per-sender message identifier used for request/response correlation.
pub type MsgId = u64;

/// A value broadcast through the cluster.
pub type Value = i64;

/// A single message on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

impl Message {
    pub fn new(src: impl Into<NodeId>, dest: impl Into<NodeId>, body: Body) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body,
        }
    }

    /// Decode a message from one line of JSON.
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Encode the message as a single line of JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Message body: the `type` tag, correlation ids, and any other fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<MsgId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MsgId>,

    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl Body {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Attach an extra field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_msg_id(mut self, msg_id: MsgId) -> Self {
        self.msg_id = Some(msg_id);
        self
    }

    pub fn in_reply_to(mut self, msg_id: Option<MsgId>) -> Self {
        self.in_reply_to = msg_id;
        self
    }

    /// Whether this body answers an earlier request.
    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
    }

    /// Deserialize the extra fields into a typed request.
    pub fn fields_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(JsonValue::Object(self.fields.clone())).map_err(|e| {
            ProtocolError::MalformedBody {
                kind: self.kind.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Build the conventional error body for a failed request.
    pub fn error(err: &ProtocolError) -> Self {
        Body::new(kinds::ERROR)
            .with_field("code", err.code())
            .with_field("text", err.to_string())
    }
}

/// Body `type` strings understood by the node.
pub mod kinds {
    pub const INIT: &str = "init";
    pub const INIT_OK: &str = "init_ok";
    pub const ECHO: &str = "echo";
    pub const ECHO_OK: &str = "echo_ok";
    pub const GENERATE: &str = "generate";
    pub const GENERATE_OK: &str = "generate_ok";
    pub const BROADCAST: &str = "broadcast";
    pub const BROADCAST_OK: &str = "broadcast_ok";
    pub const READ: &str = "read";
    pub const READ_OK: &str = "read_ok";
    pub const TOPOLOGY: &str = "topology";
    pub const TOPOLOGY_OK: &str = "topology_ok";
    pub const ERROR: &str = "error";
}

/// Allocates fresh message ids for everything a node sends.
#[derive(Debug)]
pub struct MsgIdAllocator {
    next: AtomicU64,
}

impl MsgIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> MsgId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MsgIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
