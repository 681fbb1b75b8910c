//! Node configuration.

use murmur_core::NodeId;
use murmur_gossip::GossipConfig;

/// Configuration for a node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Pre-assigned node id. Normally learned from the `init` handshake.
    pub node_id: Option<NodeId>,
    /// Gossip retry behavior.
    pub gossip: GossipConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            gossip: GossipConfig::default(),
        }
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn node_id(mut self, id: impl Into<NodeId>) -> Self {
        self.config.node_id = Some(id.into());
        self
    }

    pub fn gossip(mut self, gossip: GossipConfig) -> Self {
        self.config.gossip = gossip;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
