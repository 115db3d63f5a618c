// Ledger module - THE SHARED HISTORY
// Transaction records, the ordered dedup history and the store abstraction

mod history;
mod record;
mod store;

pub use history::History;
pub use record::TransactionRecord;
pub use store::{MemoryStore, MergeReport, StoreError, TransactionStore};

pub use crate::storage::FileStore;
