// Peer Connection - one framed TCP stream to a remote node
//
// The read half is driven by a spawned receive loop that hands each decoded
// message to a MessageHandler. The write half sits behind an async mutex so
// concurrent senders never interleave frames.

use crate::transport::{CloseReason, ConnectionId, ConnectionState, Direction, MessageHandler, TransportError};
use crate::wire::{Message, MessageCodec, WireError};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Framed read half, consumed by the receive loop
pub type MessageReader = FramedRead<OwnedReadHalf, MessageCodec>;

type MessageWriter = FramedWrite<OwnedWriteHalf, MessageCodec>;

pub struct PeerConnection {
    id: ConnectionId,
    address: SocketAddr,
    direction: Direction,
    state: Mutex<ConnectionState>,
    writer: tokio::sync::Mutex<MessageWriter>,
    shutdown: CancellationToken,
}

impl PeerConnection {
    /// Wrap an established stream. The connection starts in `Connecting`
    /// and becomes `Active` once its receive loop is spawned.
    pub fn from_stream(
        stream: TcpStream,
        direction: Direction,
        max_frame_length: usize,
    ) -> Result<(Arc<Self>, MessageReader), TransportError> {
        let address = stream
            .peer_addr()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, MessageCodec::new(max_frame_length));
        let writer = FramedWrite::new(write_half, MessageCodec::new(max_frame_length));

        let connection = Arc::new(Self {
            id: ConnectionId::generate(),
            address,
            direction,
            state: Mutex::new(ConnectionState::Connecting),
            writer: tokio::sync::Mutex::new(writer),
            shutdown: CancellationToken::new(),
        });

        Ok((connection, reader))
    }

    /// Dial `host:port`, giving up after `connect_timeout`
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        max_frame_length: usize,
    ) -> Result<(Arc<Self>, MessageReader), TransportError> {
        if host.is_empty() {
            return Err(TransportError::InvalidAddress("empty host".to_string()));
        }

        let addr = format!("{}:{}", host, port);
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        Self::from_stream(stream, Direction::Outbound, max_frame_length)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    fn transition(&self, target: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(&target) {
            *state = target;
            true
        } else {
            false
        }
    }

    /// Move to `Closed` without touching the socket.
    /// Returns false if already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        self.transition(ConnectionState::Closed)
    }

    /// Encode and write one message
    pub async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let kind = message.kind();
        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(|e| match e {
            WireError::Io(reason) => TransportError::SendFailed(reason),
            other => TransportError::InvalidMessage(other.to_string()),
        })?;

        trace!(connection = %self.id, peer = %self.address, message = %kind, "Sent message");
        Ok(())
    }

    /// Send, giving up after `limit`. A peer that stops reading fills its
    /// socket buffer; once the limit expires the connection is marked closed
    /// and the send reported as failed.
    pub async fn send_within(&self, message: Message, limit: Duration) -> Result<(), TransportError> {
        match timeout(limit, self.send(message)).await {
            Ok(result) => result,
            Err(_) => {
                self.mark_closed();
                warn!(connection = %self.id, peer = %self.address, timeout = ?limit, "Send timed out");
                Err(TransportError::SendFailed(format!("write stalled for {:?}", limit)))
            }
        }
    }

    /// Close the connection: stop the receive loop and shut down the write
    /// half. Safe to call more than once.
    pub async fn close(&self) {
        self.mark_closed();
        self.shutdown.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            debug!(connection = %self.id, error = %e, "Write half shutdown failed");
        }
    }

    /// Activate the connection and start its receive loop
    pub fn spawn_receive_loop(
        self: &Arc<Self>,
        reader: MessageReader,
        handler: Arc<dyn MessageHandler>,
    ) -> JoinHandle<()> {
        self.transition(ConnectionState::Active);
        let connection = Arc::clone(self);
        tokio::spawn(connection.receive_loop(reader, handler))
    }

    async fn receive_loop(self: Arc<Self>, mut reader: MessageReader, handler: Arc<dyn MessageHandler>) {
        let reason = loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break CloseReason::Local,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    trace!(connection = %self.id, peer = %self.address, message = %message.kind(), "Received message");
                    handler.on_message(message, &self).await;
                }
                Some(Err(e)) if e.is_format_error() => {
                    warn!(connection = %self.id, peer = %self.address, error = %e, "Dropping peer after malformed frame");
                    break CloseReason::Malformed(e.to_string());
                }
                Some(Err(e)) => break CloseReason::ReadFailed(e.to_string()),
                None => break CloseReason::PeerClosed,
            }
        };

        self.close().await;
        info!(connection = %self.id, peer = %self.address, reason = %reason, "Connection closed");
        handler.on_closed(&self, reason).await;
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .finish()
    }
}
