// Transport Traits and Core Types
// Connection identity and state, close reasons, errors and the handler seam

use crate::transport::PeerConnection;
use crate::wire::Message;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// CONNECTION ID
// ============================================================================

/// Unique identifier for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId([u8; 8]);

impl ConnectionId {
    /// Generate a new unique connection ID
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ============================================================================
// CONNECTION STATE
// ============================================================================

/// State of a connection. Closed is terminal; nothing reconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Active,
    Closed,
}

impl ConnectionState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: &ConnectionState) -> bool {
        matches!(
            (self, target),
            (Self::Connecting, Self::Active)
                | (Self::Connecting, Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by our listener
    Inbound,
    /// Dialed by us
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

// ============================================================================
// CLOSE REASON
// ============================================================================

/// Why a receive loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Remote end closed the stream
    PeerClosed,
    /// Reading from the socket failed
    ReadFailed(String),
    /// Peer sent a frame we could not decode
    Malformed(String),
    /// Closed on our side
    Local,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("closed by peer"),
            Self::ReadFailed(e) => write!(f, "read failed: {}", e),
            Self::Malformed(e) => write!(f, "malformed frame: {}", e),
            Self::Local => f.write_str("closed locally"),
        }
    }
}

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Message cannot be sent: {0}")]
    InvalidMessage(String),
}

impl TransportError {
    /// Check if the connection is unusable after this error
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::SendFailed(_) | Self::Closed)
    }
}

// ============================================================================
// MESSAGE HANDLER
// ============================================================================

/// Receiver of everything a connection's receive loop produces
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// A complete, well-formed message arrived on `connection`
    async fn on_message(&self, message: Message, connection: &Arc<PeerConnection>);

    /// The receive loop ended; `connection` is already closed
    async fn on_closed(&self, connection: &Arc<PeerConnection>, reason: CloseReason);
}
