//! In-memory cluster harness shared by the integration tests.

#![allow(dead_code)]

use murmur_core::{Body, MemoryNetwork, MemoryTransport, Message, NodeId, Transport};
use murmur_gossip::GossipConfigBuilder;
use murmur_node::{Node, NodeConfigBuilder};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::{sleep, timeout, Instant};

pub const DEADLINE: Duration = Duration::from_secs(10);

/// Nodes plus one client endpoint on a shared network.
pub struct Cluster {
    pub network: MemoryNetwork,
    pub nodes: HashMap<NodeId, Node<MemoryTransport>>,
    pub client: Client,
}

impl Cluster {
    /// Start `ids` as nodes and initialize each with the full membership.
    pub async fn start(network: MemoryNetwork, ids: &[&str]) -> Self {
        let gossip = GossipConfigBuilder::new()
            .retry_initial(10)
            .retry_max(80)
            .scan_interval(5)
            .build();

        let mut nodes = HashMap::new();
        for id in ids {
            let (transport, inbound) = network.join(*id);
            let node = Node::new(
                NodeConfigBuilder::new().gossip(gossip.clone()).build(),
                Arc::new(transport),
            );
            tokio::spawn(node.clone().run(inbound));
            nodes.insert(id.to_string(), node);
        }

        let (transport, inbox) = network.join("c1");
        let mut client = Client {
            transport,
            inbox,
            next_id: 1,
        };

        let all: Vec<JsonValue> = ids.iter().map(|id| JsonValue::from(*id)).collect();
        for id in ids {
            let init = Body::new("init")
                .with_field("node_id", *id)
                .with_field("node_ids", all.clone());
            let reply = client.rpc(id, init).await;
            assert_eq!(reply.body.kind, "init_ok");
        }

        Self {
            network,
            nodes,
            client,
        }
    }

    pub fn node(&self, id: &str) -> &Node<MemoryTransport> {
        &self.nodes[id]
    }

    /// Send the same topology map to every node.
    pub async fn configure(&mut self, topology: JsonValue) {
        let ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        for id in ids {
            let body = Body::new("topology").with_field("topology", topology.clone());
            let reply = self.client.rpc(&id, body).await;
            assert_eq!(reply.body.kind, "topology_ok");
        }
    }

    /// Wait until every node's store contains every one of `values`.
    pub async fn converged(&self, values: &[i64]) -> bool {
        self.converged_within(values, DEADLINE.as_millis() as u64).await
    }

    pub async fn converged_within(&self, values: &[i64], millis: u64) -> bool {
        let limit = Duration::from_millis(millis);
        let started = Instant::now();
        while started.elapsed() < limit {
            let done = self.nodes.values().all(|node| {
                let known = node.store().snapshot();
                values.iter().all(|v| known.contains(v))
            });
            if done {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Wait until no node has deliveries outstanding.
    pub async fn quiesced(&self) -> bool {
        let started = Instant::now();
        while started.elapsed() < DEADLINE {
            if self.nodes.values().all(|n| n.gossip().pending_count() == 0) {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub fn shutdown(&self) {
        for node in self.nodes.values() {
            node.shutdown();
        }
    }
}

/// A client endpoint issuing requests and waiting for their replies.
pub struct Client {
    pub transport: MemoryTransport,
    pub inbox: Receiver<Message>,
    next_id: u64,
}

impl Client {
    /// Send `body` to `dest` and wait for the matching reply, resending
    /// with a fresh id if the network eats the request or the reply.
    pub async fn rpc(&mut self, dest: &str, body: Body) -> Message {
        let started = Instant::now();
        while started.elapsed() < DEADLINE {
            let msg_id = self.next_id;
            self.next_id += 1;
            self.transport
                .send(Message::new("c1", dest, body.clone().with_msg_id(msg_id)))
                .await
                .expect("send failed");

            let attempt = Instant::now();
            while attempt.elapsed() < Duration::from_millis(200) {
                match timeout(Duration::from_millis(200), self.inbox.recv()).await {
                    Ok(Some(reply)) if reply.body.in_reply_to == Some(msg_id) => return reply,
                    Ok(Some(_)) => continue,
                    Ok(None) => panic!("client inbox closed"),
                    Err(_) => break,
                }
            }
        }
        panic!("no reply from {} within {:?}", dest, DEADLINE);
    }

    pub async fn broadcast(&mut self, dest: &str, value: i64) {
        let reply = self
            .rpc(dest, Body::new("broadcast").with_field("message", value))
            .await;
        assert_eq!(reply.body.kind, "broadcast_ok");
    }

    pub async fn read(&mut self, dest: &str) -> Vec<i64> {
        let reply = self.rpc(dest, Body::new("read")).await;
        assert_eq!(reply.body.kind, "read_ok");
        reply.body.fields["messages"]
            .as_array()
            .expect("messages must be an array")
            .iter()
            .map(|v| v.as_i64().expect("messages must be integers"))
            .collect()
    }
}
