//! Node identity and neighbor topology.

use crate::message::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Who this node is and which nodes make up the cluster.
///
/// Set once by the `init` handshake (or up front when the id is known).
#[derive(Debug, Default)]
pub struct Membership {
    local_id: RwLock<Option<NodeId>>,
    cluster: RwLock<Vec<NodeId>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership with a pre-assigned local id.
    pub fn with_local_id(id: impl Into<NodeId>) -> Self {
        Self {
            local_id: RwLock::new(Some(id.into())),
            cluster: RwLock::new(Vec::new()),
        }
    }

    /// Record the outcome of the `init` handshake.
    pub fn init(&self, local_id: NodeId, cluster: Vec<NodeId>) {
        *self.local_id.write() = Some(local_id);
        *self.cluster.write() = cluster;
    }

    pub fn local_id(&self) -> Option<NodeId> {
        self.local_id.read().clone()
    }

    /// Whether `id` names another node of the cluster (as opposed to a client).
    pub fn is_cluster_member(&self, id: &str) -> bool {
        self.cluster.read().iter().any(|n| n == id)
    }
}

/// Holds the current neighbor set of this node.
///
/// The set is replaced wholesale behind an `Arc`, so readers always get a
/// complete snapshot: either the set before a `configure` or the one after.
#[derive(Debug, Default)]
pub struct TopologyManager {
    neighbors: RwLock<Arc<Vec<NodeId>>>,
}

impl TopologyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the neighbor set.
    ///
    /// `local_id` is filtered out and repeated ids are collapsed, keeping the
    /// first occurrence. Returns the installed set.
    pub fn configure<I>(&self, local_id: &str, neighbors: I) -> Arc<Vec<NodeId>>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut next: Vec<NodeId> = Vec::new();
        for id in neighbors {
            if id != local_id && !next.contains(&id) {
                next.push(id);
            }
        }

        let next = Arc::new(next);
        *self.neighbors.write() = next.clone();
        next
    }

    /// Install the neighbors listed for `local_id` in a full topology map.
    ///
    /// A map that does not mention `local_id` leaves the node without neighbors.
    pub fn configure_from_map(
        &self,
        local_id: &str,
        mut topology: HashMap<NodeId, Vec<NodeId>>,
    ) -> Arc<Vec<NodeId>> {
        let mine = topology.remove(local_id).unwrap_or_default();
        self.configure(local_id, mine)
    }

    /// Current neighbor snapshot.
    pub fn neighbors(&self) -> Arc<Vec<NodeId>> {
        self.neighbors.read().clone()
    }

    pub fn is_neighbor(&self, id: &str) -> bool {
        self.neighbors.read().iter().any(|n| n == id)
    }
}
