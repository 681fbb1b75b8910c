//! # murmur-core
//!
//! Building blocks shared by every part of a Murmur gossip node.
//!
//! This crate provides:
//! - The line-delimited JSON wire protocol ([`Message`], [`Body`])
//! - [`BroadcastStore`], the deduplicated set of known values
//! - [`TopologyManager`] and [`Membership`], who we are and who we talk to
//! - The [`Transport`] trait and an in-memory [`MemoryNetwork`] for simulation
//!
//! ## Example
//!
//! ```rust
//! use murmur_core::{BroadcastStore, TopologyManager};
//!
//! let store = BroadcastStore::new();
//! assert!(store.insert(42));
//! assert!(!store.insert(42));
//! assert_eq!(store.snapshot(), vec![42]);
//!
//! let topology = TopologyManager::new();
//! topology.configure("n1", vec!["n2".to_string(), "n1".to_string()]);
//! assert_eq!(*topology.neighbors(), vec!["n2".to_string()]);
//! ```

pub mod error;
pub mod message;
pub mod store;
pub mod topology;
pub mod transport;

pub use error::{ProtocolError, TransportError};
pub use message::{kinds, Body, Message, MsgId, MsgIdAllocator, NodeId, Value};
pub use store::BroadcastStore;
pub use topology::{Membership, TopologyManager};
pub use transport::{MemoryNetwork, MemoryTransport, NetworkConfig, Transport};
