// Node - the protocol state machine
//
// Owns the wallet address, the transaction store, the listener and the set
// of peer connections. Receive loops call back into the node through
// MessageHandler; all shared state sits behind the node's own locks.

use crate::identity::WalletAddress;
use crate::ledger::{MergeReport, TransactionRecord, TransactionStore};
use crate::node::peers::{BroadcastReport, PeerSet};
use crate::node::sync::{self, SyncResult, SyncWaiters};
use crate::node::{NodeConfig, NodeError};
use crate::transport::{
    CloseReason, ConnectionId, ConnectionState, Direction, MessageHandler, MessageReader,
    PeerConnection, TransportError,
};
use crate::wire::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the accept loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

const UNKNOWN_TYPE_LOG_CHARS: usize = 64;

// ============================================================================
// NODE STATE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeState {
    #[default]
    Stopped,
    Running,
    ShutDown,
}

impl NodeState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: &NodeState) -> bool {
        matches!(
            (self, target),
            (Self::Stopped, Self::Running) | (Self::Stopped, Self::ShutDown) | (Self::Running, Self::ShutDown)
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Counters for node activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub connections_accepted: u64,
    pub connections_dialed: u64,
    pub messages_received: u64,
    pub transactions_received: u64,
    pub transactions_added: u64,
    pub syncs_served: u64,
    pub syncs_completed: u64,
    pub unknown_messages: u64,
    pub malformed_frames: u64,
    pub broadcast_failures: u64,
}

/// Read-only view of one peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub id: ConnectionId,
    pub address: SocketAddr,
    pub direction: Direction,
    pub state: ConnectionState,
}

// ============================================================================
// NODE
// ============================================================================

pub struct Node {
    config: NodeConfig,
    wallet: WalletAddress,
    store: Arc<dyn TransactionStore>,
    peers: PeerSet,
    syncs: SyncWaiters,
    state: Mutex<NodeState>,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<NodeStats>,
}

impl Node {
    /// Create a node with a freshly generated wallet address
    pub fn new(config: NodeConfig, store: Arc<dyn TransactionStore>) -> Arc<Self> {
        Self::with_wallet(config, store, WalletAddress::generate())
    }

    pub fn with_wallet(
        config: NodeConfig,
        store: Arc<dyn TransactionStore>,
        wallet: WalletAddress,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            wallet,
            store,
            peers: PeerSet::new(),
            syncs: SyncWaiters::new(),
            state: Mutex::new(NodeState::Stopped),
            local_addr: Mutex::new(None),
            accept_task: Mutex::new(None),
            stats: Mutex::new(NodeStats::default()),
        })
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    pub fn wallet_address(&self) -> &WalletAddress {
        &self.wallet
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// All known transactions in insertion order
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.store.snapshot()
    }

    pub fn transaction_count(&self) -> usize {
        self.store.len()
    }

    pub fn has_transaction(&self, record: &TransactionRecord) -> bool {
        self.store.contains(record)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peers(&self) -> Vec<PeerSummary> {
        self.peers
            .snapshot()
            .into_iter()
            .map(|c| PeerSummary {
                id: c.id(),
                address: c.address(),
                direction: c.direction(),
                state: c.state(),
            })
            .collect()
    }

    pub fn stats(&self) -> NodeStats {
        self.stats.lock().clone()
    }

    fn ensure_running(&self) -> Result<(), NodeError> {
        if self.state().is_running() {
            Ok(())
        } else {
            Err(NodeError::NotRunning)
        }
    }

    fn handler(self: &Arc<Self>) -> Arc<dyn MessageHandler> {
        Arc::clone(self) as Arc<dyn MessageHandler>
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Bind the listener, restore the store and start accepting peers.
    /// Returns the bound address.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, NodeError> {
        match self.state() {
            NodeState::Stopped => {}
            NodeState::Running => return Err(NodeError::AlreadyRunning),
            NodeState::ShutDown => return Err(NodeError::NotRunning),
        }
        self.config.validate()?;

        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| NodeError::Bind {
            address: bind_addr.clone(),
            reason: e.to_string(),
        })?;
        let local_addr = listener.local_addr().map_err(|e| NodeError::Bind {
            address: bind_addr.clone(),
            reason: e.to_string(),
        })?;

        let loaded = self.store.restore()?;

        {
            // held until the accept task is recorded so shutdown always finds it
            let mut state = self.state.lock();
            match *state {
                NodeState::Stopped => {}
                NodeState::Running => return Err(NodeError::AlreadyRunning),
                NodeState::ShutDown => return Err(NodeError::NotRunning),
            }
            *state = NodeState::Running;
            *self.local_addr.lock() = Some(local_addr);

            let node = Arc::clone(self);
            let handle = tokio::spawn(async move { node.accept_loop(listener).await });
            *self.accept_task.lock() = Some(handle);
        }

        info!(address = %local_addr, wallet = %self.wallet, transactions = loaded, "Node listening");
        Ok(local_addr)
    }

    /// Stop accepting, close every peer and flush the store.
    /// A node that never started has nothing restored, so it skips the flush.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        let previous = std::mem::replace(&mut *self.state.lock(), NodeState::ShutDown);
        if previous != NodeState::Running {
            return Ok(());
        }

        let accept_task = self.accept_task.lock().take();
        if let Some(handle) = accept_task {
            handle.abort();
            // wait until no further inbound peer can be admitted
            let _ = handle.await;
        }

        for connection in self.peers.drain() {
            self.syncs.cancel(&connection.id());
            connection.close().await;
        }

        self.store.persist()?;
        info!(wallet = %self.wallet, "Node shut down");
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!(peer = %addr, "New connection");
                    if let Err(e) = self.admit(stream) {
                        warn!(peer = %addr, error = %e, "Failed to set up inbound connection");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Wrap an accepted socket, add it to the peer set and start reading
    fn admit(self: &Arc<Self>, stream: TcpStream) -> Result<ConnectionId, NodeError> {
        let (connection, reader) =
            PeerConnection::from_stream(stream, Direction::Inbound, self.config.max_frame_length)?;

        self.peers.insert(Arc::clone(&connection));
        self.stats.lock().connections_accepted += 1;
        connection.spawn_receive_loop(reader, self.handler());

        Ok(connection.id())
    }

    // ========================================================================
    // OUTBOUND CONNECTIONS AND SYNC
    // ========================================================================

    /// Dial a peer and ask it for its history. Returns once the request is
    /// sent; the response is merged whenever it arrives.
    pub async fn connect_to_peer(self: &Arc<Self>, host: &str, port: u16) -> Result<ConnectionId, NodeError> {
        let (id, _response) = self.dial(host, port).await?;
        Ok(id)
    }

    /// Dial a peer and wait until its SyncResponse has been merged
    pub async fn connect_and_sync(self: &Arc<Self>, host: &str, port: u16) -> Result<MergeReport, NodeError> {
        let (id, response) = self.dial(host, port).await?;
        self.await_sync(id, response).await
    }

    /// Ask an already connected peer for its history and wait for the merge
    pub async fn request_sync(&self, id: ConnectionId) -> Result<MergeReport, NodeError> {
        self.ensure_running()?;
        let connection = self.peers.get(&id).ok_or(NodeError::UnknownConnection(id))?;

        let response = self.syncs.register(id);
        if let Err(e) = connection
            .send_within(Message::SyncRequest, self.config.send_timeout())
            .await
        {
            self.drop_connection(&connection).await;
            return Err(e.into());
        }

        self.await_sync(id, response).await
    }

    async fn dial(
        self: &Arc<Self>,
        host: &str,
        port: u16,
    ) -> Result<(ConnectionId, oneshot::Receiver<SyncResult>), NodeError> {
        self.ensure_running()?;

        let (connection, reader): (Arc<PeerConnection>, MessageReader) = PeerConnection::connect(
            host,
            port,
            self.config.connect_timeout(),
            self.config.max_frame_length,
        )
        .await
        .inspect_err(|e| warn!(host, port, error = %e, "Failed to connect to peer"))?;

        let id = connection.id();
        self.peers.insert(Arc::clone(&connection));

        // shutdown may have drained the peer set while we were dialing
        if !self.state().is_running() {
            self.drop_connection(&connection).await;
            return Err(NodeError::NotRunning);
        }

        self.stats.lock().connections_dialed += 1;
        info!(peer = %connection.address(), connection = %id, "Connected to peer");

        let response = self.syncs.register(id);
        if let Err(e) = connection
            .send_within(Message::SyncRequest, self.config.send_timeout())
            .await
        {
            warn!(peer = %connection.address(), error = %e, "Failed to send sync request");
            self.drop_connection(&connection).await;
            return Err(e.into());
        }

        connection.spawn_receive_loop(reader, self.handler());
        Ok((id, response))
    }

    async fn await_sync(
        &self,
        id: ConnectionId,
        response: oneshot::Receiver<SyncResult>,
    ) -> Result<MergeReport, NodeError> {
        match timeout(self.config.sync_timeout(), response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NodeError::Connection(TransportError::Closed)),
            Err(_) => {
                warn!(connection = %id, "Timed out waiting for sync response");
                Err(NodeError::Timeout(format!("sync response on connection {}", id)))
            }
        }
    }

    async fn drop_connection(&self, connection: &Arc<PeerConnection>) {
        self.peers.remove(&connection.id());
        self.syncs.cancel(&connection.id());
        connection.close().await;
    }

    // ========================================================================
    // TRANSACTIONS AND BROADCAST
    // ========================================================================

    /// Record a transfer from this node's wallet and push it to every peer
    pub async fn create_transaction(&self, recipient: &str, amount: f64) -> Result<TransactionRecord, NodeError> {
        let record = TransactionRecord::new(self.wallet.as_str(), recipient, amount);
        if !record.is_representable() {
            return Err(NodeError::InvalidTransaction(format!("amount must be finite, got {}", amount)));
        }

        if self.store.append(record.clone())? {
            info!(recipient, amount, "Transaction added and saved");
        } else {
            debug!(recipient, amount, "Transaction already recorded");
        }

        self.broadcast(Message::Transaction(record.clone())).await;
        Ok(record)
    }

    /// Send a message to every active peer; peers whose send fails are dropped
    pub async fn broadcast(&self, message: Message) -> BroadcastReport {
        self.broadcast_except(message, None).await
    }

    async fn broadcast_except(&self, message: Message, except: Option<ConnectionId>) -> BroadcastReport {
        let report = self
            .peers
            .broadcast(&message, except, self.config.send_timeout())
            .await;

        for (id, e) in &report.failed {
            warn!(connection = %id, message = %message.kind(), error = %e, "Broadcast to peer failed");
            self.stats.lock().broadcast_failures += 1;
            if e.is_connection_lost() {
                if let Some(connection) = self.peers.get(id) {
                    self.drop_connection(&connection).await;
                }
            }
        }

        debug!(message = %message.kind(), delivered = report.delivered_count(), "Broadcast complete");
        report
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    /// Handle one message received on `from`
    pub async fn dispatch(&self, message: Message, from: &Arc<PeerConnection>) {
        self.stats.lock().messages_received += 1;

        match message {
            Message::Transaction(record) => self.on_transaction(record, from).await,
            Message::SyncRequest => self.on_sync_request(from).await,
            Message::SyncResponse(records) => self.on_sync_response(records, from),
            Message::Unknown(raw) => {
                self.stats.lock().unknown_messages += 1;
                info!(peer = %from.address(), message_type = %unknown_type(&raw), "Ignoring unrecognized message");
            }
        }
    }

    async fn on_transaction(&self, record: TransactionRecord, from: &Arc<PeerConnection>) {
        self.stats.lock().transactions_received += 1;

        match self.store.append(record.clone()) {
            Ok(true) => {
                self.stats.lock().transactions_added += 1;
                info!(peer = %from.address(), transaction = %record, "Received transaction");
                if self.config.relay_transactions {
                    self.broadcast_except(Message::Transaction(record), Some(from.id())).await;
                }
            }
            Ok(false) => debug!(peer = %from.address(), transaction = %record, "Duplicate transaction"),
            Err(e) => error!(peer = %from.address(), error = %e, "Failed to store received transaction"),
        }
    }

    async fn on_sync_request(&self, from: &Arc<PeerConnection>) {
        let response = sync::respond(self.store.as_ref());

        match from.send_within(response, self.config.send_timeout()).await {
            Ok(()) => {
                self.stats.lock().syncs_served += 1;
                debug!(peer = %from.address(), "Served sync request");
            }
            Err(e) => {
                warn!(peer = %from.address(), error = %e, "Failed to send sync response");
                if e.is_connection_lost() {
                    self.drop_connection(from).await;
                }
            }
        }
    }

    fn on_sync_response(&self, records: Vec<TransactionRecord>, from: &Arc<PeerConnection>) {
        let result = sync::apply(self.store.as_ref(), records).map_err(NodeError::from);

        match &result {
            Ok(report) => {
                self.stats.lock().syncs_completed += 1;
                info!(
                    peer = %from.address(),
                    received = report.received,
                    added = report.added,
                    "Synchronized transactions"
                );
            }
            Err(e) => error!(peer = %from.address(), error = %e, "Failed to store synchronized transactions"),
        }

        self.syncs.resolve(from.id(), result);
    }
}

/// Short label for an unrecognized message; the payload itself may be huge
fn unknown_type(raw: &Value) -> String {
    match raw.get("type") {
        Some(Value::String(s)) => s.chars().take(UNKNOWN_TYPE_LOG_CHARS).collect(),
        Some(_) => "<non-string>".to_string(),
        None => "<missing>".to_string(),
    }
}

#[async_trait]
impl MessageHandler for Node {
    async fn on_message(&self, message: Message, connection: &Arc<PeerConnection>) {
        self.dispatch(message, connection).await;
    }

    async fn on_closed(&self, connection: &Arc<PeerConnection>, reason: CloseReason) {
        if matches!(reason, CloseReason::Malformed(_)) {
            self.stats.lock().malformed_frames += 1;
        }
        self.peers.remove(&connection.id());
        self.syncs.cancel(&connection.id());
    }
}
