//! Retry-until-acknowledged fan-out of newly learned values.
//!
//! Every value this node learns for the first time is forwarded to each
//! current neighbor (except the one it came from). Each forward becomes a
//! [`PendingDelivery`] that a background scheduler resends with bounded
//! exponential backoff until the neighbor's `broadcast_ok` arrives.
//!
//! ```text
//! on first sight of v (from f, or from a client):
//!   for n in neighbors \ {f}:
//!     pending[(n, v)] = attempt 1; send broadcast(v) to n
//!
//! every scan interval:
//!   for (n, v) in pending with deadline <= now:
//!     resend; attempts += 1; backoff = min(backoff * k, cap)
//!
//! on broadcast_ok from n replying to an attempt for (n, v):
//!   remove pending[(n, v)]
//! ```
//!
//! The table lock serializes the scheduler against acknowledgements, so a
//! retry never re-creates a delivery that has already been cleared. A resend
//! that was already on its way when the ack landed is a harmless duplicate.

use crate::config::GossipConfig;
use crate::pending::{DeliveryKey, PendingDelivery, PendingTable};
use futures::future::join_all;
use murmur_core::{
    kinds, Body, Membership, Message, MsgId, MsgIdAllocator, NodeId, TopologyManager, Transport,
    Value,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

struct Shared<T: Transport> {
    transport: Arc<T>,
    membership: Arc<Membership>,
    topology: Arc<TopologyManager>,
    msg_ids: Arc<MsgIdAllocator>,
    config: GossipConfig,
    table: Mutex<PendingTable>,
    shutdown: CancellationToken,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Gossip propagator for broadcast values.
///
/// Cheap to clone; clones share the same pending table and scheduler.
pub struct GossipPropagator<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for GossipPropagator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport> GossipPropagator<T> {
    /// Create a propagator. Call [`start`](Self::start) to enable retries.
    pub fn new(
        transport: Arc<T>,
        membership: Arc<Membership>,
        topology: Arc<TopologyManager>,
        msg_ids: Arc<MsgIdAllocator>,
        config: GossipConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                membership,
                topology,
                msg_ids,
                config,
                table: Mutex::new(PendingTable::new()),
                shutdown: CancellationToken::new(),
                scheduler: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &GossipConfig {
        &self.shared.config
    }

    /// A value arrived from a client: forward it to every neighbor.
    ///
    /// Returns the number of deliveries opened.
    pub async fn on_local_broadcast(&self, value: Value) -> usize {
        self.forward(value, None).await
    }

    /// A value arrived from `from`: forward it to every neighbor but `from`.
    pub async fn on_remote_broadcast(&self, value: Value, from: &str) -> usize {
        self.forward(value, Some(from)).await
    }

    /// `from` acknowledged `value`; stop retrying it there.
    pub fn on_ack(&self, from: &str, value: Value) -> bool {
        let cleared = self
            .shared
            .table
            .lock()
            .acknowledge(&DeliveryKey::new(from, value));
        match cleared {
            Some(delivery) => {
                tracing::debug!(
                    neighbor = %delivery.target,
                    value = delivery.value,
                    attempts = delivery.attempts,
                    "delivery acknowledged"
                );
                true
            }
            None => false,
        }
    }

    /// Correlate a `broadcast_ok` from `from` with the attempt it answers.
    ///
    /// Returns true if it cleared a pending delivery.
    pub fn on_reply(&self, from: &str, in_reply_to: MsgId) -> bool {
        let key = {
            let table = self.shared.table.lock();
            match table.resolve(in_reply_to) {
                Some(key) if key.target == from => key.clone(),
                Some(key) => {
                    tracing::warn!(
                        from,
                        expected = %key.target,
                        in_reply_to,
                        "ignoring acknowledgement from unexpected sender"
                    );
                    return false;
                }
                None => return false,
            }
        };
        self.on_ack(&key.target, key.value)
    }

    /// Spawn the retry scheduler. Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.shared.scheduler.lock();
        if slot.is_some() || self.shared.shutdown.is_cancelled() {
            return;
        }

        let this = self.clone();
        *slot = Some(tokio::spawn(async move { this.run_scheduler().await }));
    }

    async fn run_scheduler(self) {
        let mut ticker = interval(self.shared.config.scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shared.shutdown.cancelled() => {
                    tracing::debug!("retry scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let resent = self.retry_due_at(Instant::now()).await;
                    if resent > 0 {
                        tracing::trace!(resent, "resent unacknowledged values");
                    }
                }
            }
        }
    }

    /// Resend every delivery whose deadline has passed at `now`.
    ///
    /// Returns the number of resends. The scheduler calls this on every
    /// tick; tests may call it directly with a synthetic clock.
    pub async fn retry_due_at(&self, now: Instant) -> usize {
        if self.shared.shutdown.is_cancelled() {
            return 0;
        }
        let Some(local) = self.shared.membership.local_id() else {
            return 0;
        };

        let outbound: Vec<Message> = {
            let mut table = self.shared.table.lock();
            let mut outbound = Vec::new();
            for key in table.due(now) {
                let Some(entry) = table.get(&key) else {
                    continue;
                };
                let backoff = self.shared.config.next_backoff(entry.backoff);
                let msg_id = self.shared.msg_ids.next_id();
                if table.record_retry(&key, msg_id, now, backoff) {
                    outbound.push(gossip_message(&local, &key.target, key.value, msg_id));
                }
            }
            outbound
        };

        let resent = outbound.len();
        self.send_all(outbound).await;
        resent
    }

    /// Stop retrying, abandon every pending delivery, and send nothing more.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        if let Some(handle) = self.shared.scheduler.lock().take() {
            handle.abort();
        }
        let abandoned = self.shared.table.lock().clear();
        tracing::info!(abandoned, "gossip propagator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Number of deliveries still awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.shared.table.lock().len()
    }

    /// The pending delivery of `value` to `target`, if any.
    pub fn pending(&self, target: &str, value: Value) -> Option<PendingDelivery> {
        self.shared
            .table
            .lock()
            .get(&DeliveryKey::new(target, value))
            .cloned()
    }

    /// Neighbors that still owe an acknowledgement for `value`.
    pub fn pending_targets(&self, value: Value) -> Vec<NodeId> {
        let mut targets: Vec<NodeId> = self
            .shared
            .table
            .lock()
            .iter()
            .filter(|d| d.value == value)
            .map(|d| d.target.clone())
            .collect();
        targets.sort();
        targets
    }

    async fn forward(&self, value: Value, from: Option<&str>) -> usize {
        if self.shared.shutdown.is_cancelled() {
            return 0;
        }
        let Some(local) = self.shared.membership.local_id() else {
            tracing::warn!(value, "cannot forward before the node id is known");
            return 0;
        };

        // Targets come from the snapshot taken now; later topology changes
        // do not re-target deliveries that are already pending.
        let neighbors = self.shared.topology.neighbors();
        let now = Instant::now();
        let initial = self.shared.config.retry_initial();

        let outbound: Vec<Message> = {
            let mut table = self.shared.table.lock();
            neighbors
                .iter()
                .filter(|n| Some(n.as_str()) != from)
                .filter_map(|target| {
                    let msg_id = self.shared.msg_ids.next_id();
                    table
                        .open(DeliveryKey::new(target.clone(), value), msg_id, now, initial)
                        .then(|| gossip_message(&local, target, value, msg_id))
                })
                .collect()
        };

        let opened = outbound.len();
        tracing::debug!(value, from = ?from, opened, "forwarding value");
        self.send_all(outbound).await;
        opened
    }

    async fn send_all(&self, outbound: Vec<Message>) {
        join_all(outbound.into_iter().map(|message| self.send_one(message))).await;
    }

    async fn send_one(&self, message: Message) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        let dest = message.dest.clone();
        if let Err(e) = self.shared.transport.send(message).await {
            // Indistinguishable from loss: the delivery stays pending.
            tracing::debug!(%dest, error = %e, "gossip send failed");
        }
    }
}

fn gossip_message(local: &str, target: &str, value: Value, msg_id: MsgId) -> Message {
    Message::new(
        local,
        target,
        Body::new(kinds::BROADCAST)
            .with_msg_id(msg_id)
            .with_field("message", value),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::{MemoryNetwork, MemoryTransport};
    use std::time::Duration;
    use tokio::sync::mpsc::Receiver;

    fn propagator(network: &MemoryNetwork, neighbors: &[&str]) -> GossipPropagator<MemoryTransport> {
        let (transport, _rx) = network.join("n1");
        let topology = Arc::new(TopologyManager::new());
        topology.configure("n1", neighbors.iter().map(|s| s.to_string()));

        GossipPropagator::new(
            Arc::new(transport),
            Arc::new(Membership::with_local_id("n1")),
            topology,
            Arc::new(MsgIdAllocator::new()),
            GossipConfig::default(),
        )
    }

    fn drain(rx: &mut Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn value_of(message: &Message) -> Option<i64> {
        message.body.fields.get("message").and_then(|v| v.as_i64())
    }

    #[tokio::test]
    async fn test_local_broadcast_reaches_all_neighbors() {
        let network = MemoryNetwork::reliable();
        let (_n2, mut rx2) = network.join("n2");
        let (_n3, mut rx3) = network.join("n3");
        let gossip = propagator(&network, &["n2", "n3"]);

        assert_eq!(gossip.on_local_broadcast(7).await, 2);

        let to_n2 = drain(&mut rx2);
        let to_n3 = drain(&mut rx3);
        assert_eq!(to_n2.len(), 1);
        assert_eq!(to_n3.len(), 1);
        assert_eq!(to_n2[0].body.kind, "broadcast");
        assert_eq!(value_of(&to_n2[0]), Some(7));
        assert_eq!(gossip.pending_targets(7), vec!["n2", "n3"]);
    }

    #[tokio::test]
    async fn test_remote_broadcast_skips_sender() {
        let network = MemoryNetwork::reliable();
        let (_n2, mut rx2) = network.join("n2");
        let (_n3, mut rx3) = network.join("n3");
        let gossip = propagator(&network, &["n2", "n3"]);

        assert_eq!(gossip.on_remote_broadcast(9, "n2").await, 1);

        assert!(drain(&mut rx2).is_empty());
        assert_eq!(drain(&mut rx3).len(), 1);
        assert_eq!(gossip.pending_targets(9), vec!["n3"]);
    }

    #[tokio::test]
    async fn test_repeat_forward_does_not_duplicate_work() {
        let network = MemoryNetwork::reliable();
        let (_n2, mut rx2) = network.join("n2");
        let gossip = propagator(&network, &["n2"]);

        gossip.on_local_broadcast(1).await;
        assert_eq!(gossip.on_local_broadcast(1).await, 0);

        assert_eq!(drain(&mut rx2).len(), 1);
        assert_eq!(gossip.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_reply_clears_delivery() {
        let network = MemoryNetwork::reliable();
        let (_n2, mut rx2) = network.join("n2");
        let gossip = propagator(&network, &["n2"]);

        gossip.on_local_broadcast(5).await;
        let sent = drain(&mut rx2).remove(0);
        let msg_id = sent.body.msg_id.unwrap();

        assert!(!gossip.on_reply("n3", msg_id));
        assert!(gossip.on_reply("n2", msg_id));
        assert_eq!(gossip.pending_count(), 0);
        assert!(!gossip.on_reply("n2", msg_id));
    }

    #[tokio::test]
    async fn test_retry_resends_only_unacknowledged() {
        let network = MemoryNetwork::reliable();
        let (_n2, mut rx2) = network.join("n2");
        let (_n3, mut rx3) = network.join("n3");
        let gossip = propagator(&network, &["n2", "n3"]);

        gossip.on_local_broadcast(7).await;
        drain(&mut rx2);
        drain(&mut rx3);
        assert!(gossip.on_ack("n3", 7));

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(gossip.retry_due_at(later).await, 1);

        let resent = drain(&mut rx2);
        assert_eq!(resent.len(), 1);
        assert_eq!(value_of(&resent[0]), Some(7));
        assert!(drain(&mut rx3).is_empty());

        let pending = gossip.pending("n2", 7).unwrap();
        assert_eq!(pending.attempts, 2);
        assert_eq!(pending.backoff, Duration::from_millis(200));

        // A late ack for the first attempt still counts.
        let first_attempt = *pending.msg_ids().next().unwrap();
        assert!(gossip.on_reply("n2", first_attempt));
        assert_eq!(gossip.retry_due_at(later + Duration::from_secs(10)).await, 0);
    }

    #[tokio::test]
    async fn test_retry_not_due_before_deadline() {
        let network = MemoryNetwork::reliable();
        let (_n2, _rx2) = network.join("n2");
        let gossip = propagator(&network, &["n2"]);

        gossip.on_local_broadcast(3).await;

        assert_eq!(gossip.retry_due_at(Instant::now()).await, 0);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_delivery_pending() {
        let network = MemoryNetwork::reliable();
        let gossip = propagator(&network, &["gone"]);

        assert_eq!(gossip.on_local_broadcast(4).await, 1);
        assert_eq!(gossip.pending_targets(4), vec!["gone"]);
    }

    #[tokio::test]
    async fn test_scheduler_retries_until_acknowledged() {
        let network = MemoryNetwork::reliable();
        let (_n2, mut rx2) = network.join("n2");
        let gossip = {
            let (transport, _rx) = network.join("n1");
            let topology = Arc::new(TopologyManager::new());
            topology.configure("n1", vec!["n2".to_string()]);
            GossipPropagator::new(
                Arc::new(transport),
                Arc::new(Membership::with_local_id("n1")),
                topology,
                Arc::new(MsgIdAllocator::new()),
                crate::GossipConfigBuilder::new()
                    .retry_initial(5)
                    .retry_max(10)
                    .scan_interval(1)
                    .build(),
            )
        };
        gossip.start();
        gossip.on_local_broadcast(11).await;

        let mut received = 0;
        while received < 3 {
            let message = tokio::time::timeout(Duration::from_secs(5), rx2.recv())
                .await
                .expect("retry did not arrive")
                .unwrap();
            assert_eq!(value_of(&message), Some(11));
            received += 1;
        }

        assert!(gossip.on_ack("n2", 11));
        gossip.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_abandons_and_silences() {
        let network = MemoryNetwork::reliable();
        let (_n2, mut rx2) = network.join("n2");
        let gossip = propagator(&network, &["n2"]);
        gossip.start();

        gossip.on_local_broadcast(1).await;
        drain(&mut rx2);
        gossip.shutdown();

        assert!(gossip.is_shut_down());
        assert_eq!(gossip.pending_count(), 0);
        assert_eq!(gossip.on_local_broadcast(2).await, 0);
        assert_eq!(
            gossip.retry_due_at(Instant::now() + Duration::from_secs(60)).await,
            0
        );
        assert!(drain(&mut rx2).is_empty());
    }
}
