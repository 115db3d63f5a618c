// Transaction Store - the node's view of the ledger
//
// Every implementation serializes its operations behind one lock so that
// the contains-then-append sequence is a single critical section.

use crate::ledger::{History, TransactionRecord};
use parking_lot::Mutex;
use thiserror::Error;

/// Errors from store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("IO error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Stored transactions in {path} are corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Outcome of merging a batch of records into a store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records offered to the store
    pub received: usize,
    /// Records that were not present before
    pub added: usize,
    /// Records that were already present
    pub skipped: usize,
}

/// Ordered, deduplicated transaction history
pub trait TransactionStore: Send + Sync {
    /// Check whether a structurally equal record is present
    fn contains(&self, record: &TransactionRecord) -> bool;

    /// Append a record unless already present, then persist.
    /// Returns true only if the record was newly added.
    fn append(&self, record: TransactionRecord) -> Result<bool, StoreError>;

    /// Append every record not yet present and persist once
    fn merge(&self, records: Vec<TransactionRecord>) -> Result<MergeReport, StoreError>;

    /// All records in insertion order
    fn snapshot(&self) -> Vec<TransactionRecord>;

    /// Write the full snapshot to durable storage
    fn persist(&self) -> Result<(), StoreError>;

    /// Load a prior snapshot, if any. Returns the number of records loaded.
    fn restore(&self) -> Result<usize, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store with no durable medium
///
/// `persist` and `restore` are no-ops; a restart loses everything.
#[derive(Debug, Default)]
pub struct MemoryStore {
    history: Mutex<History>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records (duplicates collapsed)
    pub fn with_records(records: Vec<TransactionRecord>) -> Self {
        Self {
            history: Mutex::new(History::from_records(records)),
        }
    }
}

impl TransactionStore for MemoryStore {
    fn contains(&self, record: &TransactionRecord) -> bool {
        self.history.lock().contains(record)
    }

    fn append(&self, record: TransactionRecord) -> Result<bool, StoreError> {
        Ok(self.history.lock().insert(record))
    }

    fn merge(&self, records: Vec<TransactionRecord>) -> Result<MergeReport, StoreError> {
        let mut history = self.history.lock();
        let received = records.len();
        let added = records.into_iter().filter(|r| history.insert(r.clone())).count();

        Ok(MergeReport {
            received,
            added,
            skipped: received - added,
        })
    }

    fn snapshot(&self) -> Vec<TransactionRecord> {
        self.history.lock().to_vec()
    }

    fn persist(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn restore(&self) -> Result<usize, StoreError> {
        Ok(self.history.lock().len())
    }

    fn len(&self) -> usize {
        self.history.lock().len()
    }
}
