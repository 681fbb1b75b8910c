//! Transport abstraction and an in-memory network for tests and simulation.

use crate::error::TransportError;
use crate::message::{Message, NodeId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound half of a transport. Inbound messages arrive on a channel.
///
/// Delivery is unreliable: a successful `send` only means the message was
/// handed off, not that it will arrive.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a message to `message.dest`.
    async fn send(&self, message: Message) -> Result<(), TransportError>;
}

/// Network configuration for simulation
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Probability of message loss (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability of message duplication (0.0 - 1.0)
    pub dup_rate: f64,
    /// Seed for the loss/duplication decisions
    pub seed: u64,
    /// Capacity of each endpoint's inbound channel
    pub channel_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            dup_rate: 0.0,
            seed: 12345,
            channel_capacity: 1024,
        }
    }
}

impl NetworkConfig {
    /// Create a lossy network configuration
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    /// Create a network with duplicates
    pub fn with_dups(dup_rate: f64) -> Self {
        Self {
            dup_rate,
            ..Default::default()
        }
    }

    /// Create a chaotic network (loss and duplication)
    pub fn chaotic() -> Self {
        Self {
            loss_rate: 0.2,
            dup_rate: 0.2,
            ..Default::default()
        }
    }

    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

type Link = (NodeId, NodeId);

struct NetworkInner {
    config: NetworkConfig,
    endpoints: RwLock<HashMap<NodeId, mpsc::Sender<Message>>>,
    blocked: RwLock<HashSet<Link>>,
    delivered: Mutex<HashMap<Link, usize>>,
    dropped: Mutex<usize>,
    rng: Mutex<StdRng>,
}

/// An in-process network connecting any number of endpoints.
///
/// Messages can be dropped or duplicated at random, and individual directed
/// links can be blocked to simulate partitions.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner: Arc::new(NetworkInner {
                config,
                endpoints: RwLock::new(HashMap::new()),
                blocked: RwLock::new(HashSet::new()),
                delivered: Mutex::new(HashMap::new()),
                dropped: Mutex::new(0),
                rng: Mutex::new(rng),
            }),
        }
    }

    /// A lossless network.
    pub fn reliable() -> Self {
        Self::new(NetworkConfig::default())
    }

    /// Attach an endpoint, returning its transport and inbound channel.
    pub fn join(&self, id: impl Into<NodeId>) -> (MemoryTransport, mpsc::Receiver<Message>) {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.inner.config.channel_capacity);
        self.inner.endpoints.write().insert(id, tx);

        let transport = MemoryTransport {
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Silently drop everything sent from `from` to `to`.
    pub fn block(&self, from: &str, to: &str) {
        self.inner
            .blocked
            .write()
            .insert((from.to_string(), to.to_string()));
    }

    pub fn unblock(&self, from: &str, to: &str) {
        self.inner
            .blocked
            .write()
            .remove(&(from.to_string(), to.to_string()));
    }

    /// Messages delivered from `from` to `to` so far.
    pub fn delivered(&self, from: &str, to: &str) -> usize {
        self.inner
            .delivered
            .lock()
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Total messages dropped (random loss and blocked links).
    pub fn dropped(&self) -> usize {
        *self.inner.dropped.lock()
    }

    async fn route(&self, message: Message) -> Result<(), TransportError> {
        let tx = self
            .inner
            .endpoints
            .read()
            .get(&message.dest)
            .cloned()
            .ok_or_else(|| TransportError::UnknownDestination(message.dest.clone()))?;

        let link = (message.src.clone(), message.dest.clone());
        if self.inner.blocked.read().contains(&link) {
            *self.inner.dropped.lock() += 1;
            return Ok(());
        }

        let (lost, duplicated) = {
            let mut rng = self.inner.rng.lock();
            (
                rng.gen_bool(self.inner.config.loss_rate),
                rng.gen_bool(self.inner.config.dup_rate),
            )
        };
        if lost {
            *self.inner.dropped.lock() += 1;
            return Ok(());
        }

        let copies = if duplicated { 2 } else { 1 };
        for _ in 0..copies {
            tx.send(message.clone())
                .await
                .map_err(|_| TransportError::Closed)?;
            *self.inner.delivered.lock().entry(link.clone()).or_default() += 1;
        }
        Ok(())
    }
}

/// One endpoint's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.network.route(message).await
    }
}
