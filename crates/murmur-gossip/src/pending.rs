//! Outstanding deliveries awaiting acknowledgement.
//!
//! Each [`PendingDelivery`] is one obligation to get one value to one
//! neighbor. It stays in the [`PendingTable`] until that neighbor
//! acknowledges (any of the recent attempts) or the table is cleared on
//! shutdown. Removal is final: a delivery that was acknowledged is never
//! brought back by a retry.

use murmur_core::{MsgId, NodeId, Value};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// How many recent attempt ids stay resolvable per delivery.
pub const TRACKED_ATTEMPTS: usize = 16;

/// Identifies a delivery: which value, to which neighbor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub target: NodeId,
    pub value: Value,
}

impl DeliveryKey {
    pub fn new(target: impl Into<NodeId>, value: Value) -> Self {
        Self {
            target: target.into(),
            value,
        }
    }
}

/// One in-flight obligation to deliver `value` to `target`.
#[derive(Clone, Debug)]
pub struct PendingDelivery {
    pub target: NodeId,
    pub value: Value,
    /// Number of sends so far, including the first.
    pub attempts: u32,
    /// When the next resend becomes due.
    pub next_retry: Instant,
    /// Wait that preceded `next_retry`.
    pub backoff: Duration,
    /// Message ids of the most recent attempts, oldest first.
    msg_ids: VecDeque<MsgId>,
}

impl PendingDelivery {
    pub fn key(&self) -> DeliveryKey {
        DeliveryKey::new(self.target.clone(), self.value)
    }

    pub fn msg_ids(&self) -> impl Iterator<Item = &MsgId> {
        self.msg_ids.iter()
    }
}

/// All pending deliveries of a node, indexed by key and by attempt id.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<DeliveryKey, PendingDelivery>,
    by_msg_id: HashMap<MsgId, DeliveryKey>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a first attempt sent as `msg_id`.
    ///
    /// Returns false, leaving the table untouched, if the same value is
    /// already pending for the same target.
    pub fn open(&mut self, key: DeliveryKey, msg_id: MsgId, now: Instant, backoff: Duration) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }

        let mut msg_ids = VecDeque::with_capacity(TRACKED_ATTEMPTS);
        msg_ids.push_back(msg_id);
        self.by_msg_id.insert(msg_id, key.clone());
        self.entries.insert(
            key.clone(),
            PendingDelivery {
                target: key.target,
                value: key.value,
                attempts: 1,
                next_retry: now + backoff,
                backoff,
                msg_ids,
            },
        );
        true
    }

    /// Record a resend of a still-pending delivery.
    ///
    /// Returns false if the delivery is no longer pending.
    pub fn record_retry(
        &mut self,
        key: &DeliveryKey,
        msg_id: MsgId,
        now: Instant,
        backoff: Duration,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };

        entry.attempts += 1;
        entry.backoff = backoff;
        entry.next_retry = now + backoff;
        entry.msg_ids.push_back(msg_id);
        if entry.msg_ids.len() > TRACKED_ATTEMPTS {
            if let Some(old) = entry.msg_ids.pop_front() {
                self.by_msg_id.remove(&old);
            }
        }
        self.by_msg_id.insert(msg_id, key.clone());
        true
    }

    /// Deliveries whose retry deadline has passed at `now`.
    pub fn due(&self, now: Instant) -> Vec<DeliveryKey> {
        self.entries
            .values()
            .filter(|d| d.next_retry <= now)
            .map(PendingDelivery::key)
            .collect()
    }

    /// Key of the delivery an attempt id belongs to.
    pub fn resolve(&self, msg_id: MsgId) -> Option<&DeliveryKey> {
        self.by_msg_id.get(&msg_id)
    }

    /// Clear a delivery on acknowledgement.
    pub fn acknowledge(&mut self, key: &DeliveryKey) -> Option<PendingDelivery> {
        let entry = self.entries.remove(key)?;
        for id in &entry.msg_ids {
            self.by_msg_id.remove(id);
        }
        Some(entry)
    }

    pub fn get(&self, key: &DeliveryKey) -> Option<&PendingDelivery> {
        self.entries.get(key)
    }

    /// Abandon everything.
    pub fn clear(&mut self) -> usize {
        let abandoned = self.entries.len();
        self.entries.clear();
        self.by_msg_id.clear();
        abandoned
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingDelivery> {
        self.entries.values()
    }
}
