// Transport module - THE WIRE
// One TCP connection per peer, framed with the message codec

mod connection;
mod traits;

pub use connection::{MessageReader, PeerConnection, DEFAULT_CONNECT_TIMEOUT};
pub use traits::{
    // Callback seam into the node
    MessageHandler,
    // Connection types
    CloseReason, ConnectionId, ConnectionState, Direction,
    // Errors
    TransportError,
};
