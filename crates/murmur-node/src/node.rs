//! The node runtime: one task per inbound message, replies, shutdown.

use crate::config::NodeConfig;
use crate::dispatcher::Dispatcher;
use murmur_core::{
    Body, BroadcastStore, Membership, Message, MsgIdAllocator, NodeId, ProtocolError,
    TopologyManager, Transport, TransportError,
};
use murmur_gossip::GossipPropagator;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

struct NodeInner<T: Transport> {
    transport: Arc<T>,
    dispatcher: Dispatcher<T>,
    msg_ids: Arc<MsgIdAllocator>,
    shutdown: CancellationToken,
}

/// A broadcast node bound to a transport.
///
/// Cheap to clone; clones control the same node.
///
/// # Example
///
/// ```rust
/// use murmur_core::MemoryNetwork;
/// use murmur_node::{Node, NodeConfigBuilder};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let network = MemoryNetwork::reliable();
/// let (transport, inbound) = network.join("n1");
/// let node = Node::new(NodeConfigBuilder::new().node_id("n1").build(), Arc::new(transport));
///
/// let running = tokio::spawn(node.clone().run(inbound));
/// node.shutdown();
/// running.await.unwrap();
/// # });
/// ```
pub struct Node<T: Transport> {
    inner: Arc<NodeInner<T>>,
}

impl<T: Transport> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> Node<T> {
    pub fn new(config: NodeConfig, transport: Arc<T>) -> Self {
        let membership = Arc::new(match config.node_id {
            Some(id) => Membership::with_local_id(id),
            None => Membership::new(),
        });
        let topology = Arc::new(TopologyManager::new());
        let msg_ids = Arc::new(MsgIdAllocator::new());
        let gossip = GossipPropagator::new(
            transport.clone(),
            membership.clone(),
            topology.clone(),
            msg_ids.clone(),
            config.gossip,
        );
        let dispatcher = Dispatcher::new(
            membership,
            Arc::new(BroadcastStore::new()),
            topology,
            gossip,
        );

        Self {
            inner: Arc::new(NodeInner {
                transport,
                dispatcher,
                msg_ids,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn local_id(&self) -> Option<NodeId> {
        self.inner.dispatcher.membership().local_id()
    }

    pub fn store(&self) -> &Arc<BroadcastStore> {
        self.inner.dispatcher.store()
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        self.inner.dispatcher.topology()
    }

    pub fn gossip(&self) -> &GossipPropagator<T> {
        self.inner.dispatcher.gossip()
    }

    /// Handle messages until `inbound` closes or [`shutdown`](Self::shutdown).
    ///
    /// When `inbound` closes, requests already received are still answered
    /// before the node shuts down. An explicit shutdown stops at once.
    pub async fn run(self, mut inbound: mpsc::Receiver<Message>) {
        self.gossip().start();
        tracing::info!(node_id = ?self.local_id(), "node running");

        let handlers = TaskTracker::new();
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(message) => {
                        let node = self.clone();
                        handlers.spawn(async move { node.process(message).await });
                    }
                    None => {
                        tracing::info!(in_flight = handlers.len(), "inbound channel closed");
                        break;
                    }
                },
            }
        }

        handlers.close();
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => {}
            _ = handlers.wait() => {}
        }
        self.shutdown();
    }

    /// Stop handling messages and abandon pending deliveries.
    ///
    /// Nothing is sent by this node afterwards.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.gossip().shutdown();
        tracing::info!(node_id = ?self.local_id(), "node shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Dispatch one message and send its reply, if any.
    pub async fn process(&self, message: Message) {
        if self.is_shut_down() {
            return;
        }

        let body = match self.handle(&message).await {
            Ok(Some(body)) => body,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(from = %message.src, kind = %message.body.kind, error = %err, "request failed");
                Body::error(&err)
            }
        };

        if let Err(e) = self.reply(&message, body).await {
            tracing::debug!(to = %message.src, error = %e, "reply not sent");
        }
    }

    /// Run the dispatcher on its own task; a panic there becomes an internal error.
    async fn handle(&self, message: &Message) -> Result<Option<Body>, ProtocolError> {
        let node = self.clone();
        let request = message.clone();
        tokio::spawn(async move { node.inner.dispatcher.dispatch(&request).await })
            .await
            .unwrap_or_else(|e| Err(ProtocolError::Internal(e.to_string())))
    }

    async fn reply(&self, request: &Message, body: Body) -> Result<(), TransportError> {
        if self.is_shut_down() {
            return Ok(());
        }

        let src = self.local_id().unwrap_or_else(|| request.dest.clone());
        let body = body
            .with_msg_id(self.inner.msg_ids.next_id())
            .in_reply_to(request.body.msg_id);
        self.inner
            .transport
            .send(Message::new(src, request.src.clone(), body))
            .await
    }
}
