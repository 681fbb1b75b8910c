//! # murmur-gossip
//!
//! Reliable dissemination of broadcast values to neighbor nodes.
//!
//! The transport underneath may drop or duplicate anything, so every
//! forward is tracked as a pending delivery and resent with bounded
//! exponential backoff until the neighbor acknowledges it:
//!
//! - [`GossipPropagator`] decides who gets a value and drives retries
//! - [`PendingTable`] holds the outstanding `(neighbor, value)` deliveries
//! - [`GossipConfig`] tunes the backoff and the scheduler's scan interval
//!
//! Deduplication happens before this crate is involved: callers only hand
//! over values that were new to the local store.

mod config;
mod pending;
mod propagator;

pub use config::{GossipConfig, GossipConfigBuilder};
pub use pending::{DeliveryKey, PendingDelivery, PendingTable, TRACKED_ATTEMPTS};
pub use propagator::GossipPropagator;
