//! Murmur node - a gossip broadcast participant
//!
//! A node answers client requests (`echo`, `generate`, `broadcast`, `read`,
//! `topology`) and gossips every newly learned value to its neighbors until
//! each of them has acknowledged it.
//!
//! # Architecture
//!
//! - [`dispatcher`] - Routes inbound messages to the store, topology and gossip layers
//! - [`node`] - Runtime: one task per inbound message, replies, shutdown
//! - [`stdio`] - Line-delimited JSON transport over stdin/stdout
//! - [`ids`] - Unique id generation for `generate`
//! - [`config`] - Node configuration

pub mod config;
pub mod dispatcher;
pub mod ids;
pub mod node;
pub mod stdio;

pub use config::{NodeConfig, NodeConfigBuilder};
pub use dispatcher::Dispatcher;
pub use ids::IdGenerator;
pub use node::Node;
pub use stdio::{StdioTasks, StdioTransport};
