//! Propagation tests for the gossip layer on its own.
//!
//! Each simulated replica is a store plus a propagator, driven by a small
//! relay loop that stores incoming values, forwards new ones and answers
//! with `broadcast_ok`. The network underneath drops messages at random.

use murmur_core::{
    kinds, Body, BroadcastStore, Membership, MemoryNetwork, Message, MsgIdAllocator,
    NetworkConfig, TopologyManager, Transport,
};
use murmur_gossip::{GossipConfigBuilder, GossipPropagator};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

struct Replica {
    store: Arc<BroadcastStore>,
    gossip: GossipPropagator<murmur_core::MemoryTransport>,
}

fn spawn_replica(network: &MemoryNetwork, id: &str, neighbors: &[&str]) -> Replica {
    let (transport, mut inbound) = network.join(id);
    let transport = Arc::new(transport);
    let topology = Arc::new(TopologyManager::new());
    topology.configure(id, neighbors.iter().map(|s| s.to_string()));
    let msg_ids = Arc::new(MsgIdAllocator::new());
    let gossip = GossipPropagator::new(
        transport.clone(),
        Arc::new(Membership::with_local_id(id)),
        topology,
        msg_ids.clone(),
        GossipConfigBuilder::new()
            .retry_initial(10)
            .retry_max(40)
            .scan_interval(5)
            .build(),
    );
    gossip.start();

    let store = Arc::new(BroadcastStore::new());
    let relay = Replica {
        store: store.clone(),
        gossip: gossip.clone(),
    };

    let local = id.to_string();
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            match message.body.kind.as_str() {
                kinds::BROADCAST => {
                    let Some(value) = message.body.fields.get("message").and_then(|v| v.as_i64())
                    else {
                        continue;
                    };
                    if store.insert(value) {
                        gossip.on_remote_broadcast(value, &message.src).await;
                    }
                    let ack = Body::new(kinds::BROADCAST_OK)
                        .with_msg_id(msg_ids.next_id())
                        .in_reply_to(message.body.msg_id);
                    let _ = transport.send(Message::new(local.clone(), message.src, ack)).await;
                }
                kinds::BROADCAST_OK => {
                    if let Some(id) = message.body.in_reply_to {
                        gossip.on_reply(&message.src, id);
                    }
                }
                _ => {}
            }
        }
    });

    relay
}

async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(10) {
        if done() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_line_converges_under_loss() {
    let network = MemoryNetwork::new(NetworkConfig::lossy(0.4));
    let a = spawn_replica(&network, "a", &["b"]);
    let b = spawn_replica(&network, "b", &["a", "c"]);
    let c = spawn_replica(&network, "c", &["b"]);

    for v in 0..10 {
        let origin = if v % 2 == 0 { &a } else { &c };
        if origin.store.insert(v) {
            origin.gossip.on_local_broadcast(v).await;
        }
    }

    let replicas = [&a, &b, &c];
    assert!(
        wait_until(|| replicas.iter().all(|r| r.store.len() == 10)).await,
        "replicas did not converge"
    );
    assert!(wait_until(|| replicas.iter().all(|r| r.gossip.pending_count() == 0)).await);
    assert!(network.dropped() > 0);

    for r in replicas {
        r.gossip.shutdown();
    }
}

#[tokio::test]
async fn test_duplicated_messages_are_harmless() {
    let network = MemoryNetwork::new(NetworkConfig::with_dups(0.8));
    let a = spawn_replica(&network, "a", &["b"]);
    let b = spawn_replica(&network, "b", &["a"]);

    a.store.insert(1);
    a.gossip.on_local_broadcast(1).await;

    assert!(wait_until(|| b.store.contains(&1)).await);
    assert!(wait_until(|| a.gossip.pending_count() == 0).await);
    assert_eq!(b.store.snapshot(), vec![1]);
    assert_eq!(b.gossip.pending_count(), 0);

    a.gossip.shutdown();
    b.gossip.shutdown();
}
