//! Routes inbound messages to the store, topology and gossip layers.

use crate::ids::IdGenerator;
use murmur_core::{
    kinds, Body, BroadcastStore, Membership, Message, NodeId, ProtocolError, TopologyManager,
    Transport, Value,
};
use murmur_gossip::GossipPropagator;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Deserialize)]
struct InitRequest {
    node_id: NodeId,
    node_ids: Vec<NodeId>,
}

#[derive(Deserialize)]
struct BroadcastRequest {
    message: Value,
}

#[derive(Deserialize)]
struct TopologyRequest {
    topology: HashMap<NodeId, Vec<NodeId>>,
}

/// Maps each request type to its handler and builds the reply body.
pub struct Dispatcher<T: Transport> {
    membership: Arc<Membership>,
    store: Arc<BroadcastStore>,
    topology: Arc<TopologyManager>,
    gossip: GossipPropagator<T>,
    ids: IdGenerator,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        membership: Arc<Membership>,
        store: Arc<BroadcastStore>,
        topology: Arc<TopologyManager>,
        gossip: GossipPropagator<T>,
    ) -> Self {
        Self {
            membership,
            store,
            topology,
            gossip,
            ids: IdGenerator::new(),
        }
    }

    pub fn store(&self) -> &Arc<BroadcastStore> {
        &self.store
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn gossip(&self) -> &GossipPropagator<T> {
        &self.gossip
    }

    /// Handle one inbound message.
    ///
    /// Returns the reply body for requests, `None` for replies to our own
    /// messages. On error nothing has been mutated.
    pub async fn dispatch(&self, message: &Message) -> Result<Option<Body>, ProtocolError> {
        if let Some(in_reply_to) = message.body.in_reply_to {
            self.on_reply(message, in_reply_to);
            return Ok(None);
        }

        let body = &message.body;
        let reply = match body.kind.as_str() {
            kinds::INIT => self.init(body)?,
            kinds::ECHO => self.echo(body),
            kinds::GENERATE => Body::new(kinds::GENERATE_OK).with_field("id", self.ids.next_id()),
            kinds::BROADCAST => self.broadcast(&message.src, body).await?,
            kinds::READ => Body::new(kinds::READ_OK).with_field("messages", self.store.snapshot()),
            kinds::TOPOLOGY => self.configure_topology(body)?,
            other => return Err(ProtocolError::UnknownMessageType(other.to_string())),
        };
        Ok(Some(reply))
    }

    fn init(&self, body: &Body) -> Result<Body, ProtocolError> {
        let request: InitRequest = body.fields_as()?;
        tracing::info!(node_id = %request.node_id, cluster = request.node_ids.len(), "node initialized");
        self.membership.init(request.node_id, request.node_ids);
        Ok(Body::new(kinds::INIT_OK))
    }

    fn echo(&self, body: &Body) -> Body {
        Body {
            kind: kinds::ECHO_OK.to_string(),
            fields: body.fields.clone(),
            ..Default::default()
        }
    }

    async fn broadcast(&self, src: &str, body: &Body) -> Result<Body, ProtocolError> {
        let request: BroadcastRequest = body.fields_as()?;
        let value = request.message;
        // A value stored now could never be forwarded.
        if self.membership.local_id().is_none() {
            return Err(ProtocolError::NotInitialized);
        }

        if self.store.insert(value) {
            if self.is_peer(src) {
                self.gossip.on_remote_broadcast(value, src).await;
            } else {
                self.gossip.on_local_broadcast(value).await;
            }
        } else {
            tracing::trace!(value, from = src, "duplicate value");
        }
        Ok(Body::new(kinds::BROADCAST_OK))
    }

    fn configure_topology(&self, body: &Body) -> Result<Body, ProtocolError> {
        let request: TopologyRequest = body.fields_as()?;
        let local = self
            .membership
            .local_id()
            .ok_or(ProtocolError::NotInitialized)?;

        let neighbors = self.topology.configure_from_map(&local, request.topology);
        tracing::info!(neighbors = ?neighbors, "topology configured");
        Ok(Body::new(kinds::TOPOLOGY_OK))
    }

    fn on_reply(&self, message: &Message, in_reply_to: u64) {
        match message.body.kind.as_str() {
            kinds::BROADCAST_OK => {
                if !self.gossip.on_reply(&message.src, in_reply_to) {
                    tracing::trace!(from = %message.src, in_reply_to, "stale acknowledgement");
                }
            }
            kinds::ERROR => {
                tracing::warn!(from = %message.src, in_reply_to, fields = ?message.body.fields, "peer reported an error");
            }
            other => {
                tracing::debug!(from = %message.src, kind = other, "ignoring reply");
            }
        }
    }

    /// Other cluster nodes gossip to us; everyone else is a client.
    fn is_peer(&self, src: &str) -> bool {
        self.membership.is_cluster_member(src) || self.topology.is_neighbor(src)
    }
}
