// Sync Protocol - full-state reconciliation
//
// The dialing side sends SyncRequest; the peer answers with its whole
// history and the requester unions it into its own store. Nothing is
// diffed: every record in the response is checked against the store.

use crate::ledger::{MergeReport, StoreError, TransactionRecord, TransactionStore};
use crate::node::NodeError;
use crate::transport::ConnectionId;
use crate::wire::Message;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

pub(crate) type SyncResult = Result<MergeReport, NodeError>;

/// Build the response to a peer's SyncRequest
pub(crate) fn respond(store: &dyn TransactionStore) -> Message {
    Message::SyncResponse(store.snapshot())
}

/// Union a peer's history into the local store
pub(crate) fn apply(
    store: &dyn TransactionStore,
    records: Vec<TransactionRecord>,
) -> Result<MergeReport, StoreError> {
    store.merge(records)
}

/// Callers waiting for the SyncResponse to their SyncRequest
///
/// Responses on a connection arrive in request order, so each connection
/// keeps a FIFO of waiters.
#[derive(Default)]
pub(crate) struct SyncWaiters {
    waiters: Mutex<HashMap<ConnectionId, VecDeque<oneshot::Sender<SyncResult>>>>,
}

impl SyncWaiters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next response on `id`
    pub(crate) fn register(&self, id: ConnectionId) -> oneshot::Receiver<SyncResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().entry(id).or_default().push_back(tx);
        rx
    }

    /// Hand a merge outcome to the oldest waiter on `id`.
    /// Returns false if nobody was waiting.
    pub(crate) fn resolve(&self, id: ConnectionId, result: SyncResult) -> bool {
        let waiter = {
            let mut waiters = self.waiters.lock();
            let waiter = waiters.get_mut(&id).and_then(VecDeque::pop_front);
            if waiters.get(&id).is_some_and(VecDeque::is_empty) {
                waiters.remove(&id);
            }
            waiter
        };

        match waiter {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Drop every waiter on `id`; their receivers observe a closed channel
    pub(crate) fn cancel(&self, id: &ConnectionId) {
        self.waiters.lock().remove(id);
    }
}
