use crate::ledger::StoreError;
use crate::transport::{ConnectionId, TransportError};
use crate::wire::WireError;
use thiserror::Error;

/// Errors surfaced by node operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("Connection error: {0}")]
    Connection(#[from] TransportError),

    #[error("Format error: {0}")]
    Format(#[from] WireError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Node not running")]
    NotRunning,

    #[error("Node already running")]
    AlreadyRunning,
}
