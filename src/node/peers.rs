// Peer Set - the node's active connections
//
// Sends never happen while the map lock is held: broadcast snapshots the
// connections first, and removal of failed peers is left to the caller.
// Every send is bounded and they all run at once, so a stalled peer holds
// up nobody but itself.

use crate::transport::{ConnectionId, PeerConnection, TransportError};
use crate::wire::Message;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of sending one message to every peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the message
    pub delivered: Vec<ConnectionId>,
    /// Connections whose send failed
    pub failed: Vec<(ConnectionId, TransportError)>,
}

impl BroadcastReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
pub struct PeerSet {
    peers: Mutex<HashMap<ConnectionId, Arc<PeerConnection>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Arc<PeerConnection>) {
        self.peers.lock().insert(connection.id(), connection);
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<PeerConnection>> {
        self.peers.lock().remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<PeerConnection>> {
        self.peers.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Copy of the current connections
    pub fn snapshot(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.lock().values().cloned().collect()
    }

    /// Remove and return every connection
    pub fn drain(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.lock().drain().map(|(_, c)| c).collect()
    }

    /// Send `message` to every connection except `except`, each send
    /// bounded by `limit`. A failed send never stops delivery to the
    /// remaining peers.
    pub async fn broadcast(
        &self,
        message: &Message,
        except: Option<ConnectionId>,
        limit: Duration,
    ) -> BroadcastReport {
        let sends = self
            .snapshot()
            .into_iter()
            .filter(|connection| Some(connection.id()) != except)
            .map(|connection| async move {
                let result = connection.send_within(message.clone(), limit).await;
                (connection.id(), result)
            });

        let mut report = BroadcastReport::default();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(id),
                Err(e) => report.failed.push((id, e)),
            }
        }

        report
    }
}
