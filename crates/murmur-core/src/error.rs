//! Error types for the wire protocol and transports.

use crate::message::NodeId;
use thiserror::Error;

/// Errors raised while interpreting an inbound request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed {kind} body: {reason}")]
    MalformedBody { kind: String, reason: String },

    #[error("unsupported message type: {0}")]
    UnknownMessageType(String),

    #[error("node has not been initialized")]
    NotInitialized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Numeric code carried in `error` replies.
    pub fn code(&self) -> u32 {
        match self {
            ProtocolError::UnknownMessageType(_) => 10,
            ProtocolError::NotInitialized => 11,
            ProtocolError::MalformedBody { .. } => 12,
            ProtocolError::Internal(_) => 13,
        }
    }
}

/// Errors raised by a transport when handing a message off.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown destination: {0}")]
    UnknownDestination(NodeId),

    #[error("transport closed")]
    Closed,
}
