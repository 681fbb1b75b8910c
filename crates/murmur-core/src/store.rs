//! Grow-only store of every value known to this node.
//! Values are only ever added; equality decides what counts as a duplicate.

use crate::message::Value;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug)]
struct Inner<T> {
    members: HashSet<T>,
    // Insertion order, for deterministic snapshots.
    order: Vec<T>,
}

/// Deduplicated, monotonically growing set of broadcast values.
///
/// All access goes through an internal lock, so `insert` is atomic: two
/// concurrent inserts of the same value never both report "newly added".
#[derive(Debug)]
pub struct BroadcastStore<T: Eq + Hash + Clone = Value> {
    inner: RwLock<Inner<T>>,
}

impl<T: Eq + Hash + Clone> BroadcastStore<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                members: HashSet::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Add a value (the only mutation allowed). Returns true iff it was new.
    pub fn insert(&self, value: T) -> bool {
        let mut inner = self.inner.write();
        if !inner.members.insert(value.clone()) {
            return false;
        }
        inner.order.push(value);
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.read().members.contains(value)
    }

    /// All known values, in the order they were first inserted.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }
}

impl<T: Eq + Hash + Clone> Default for BroadcastStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
