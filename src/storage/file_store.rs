// FileStore - JSON file persistence for the transaction history
//
// The whole history is rewritten on every successful append. Writes go to a
// sibling temp file that is then renamed over the real one, so a crash
// mid-write leaves the previous snapshot intact.

use crate::ledger::{History, MergeReport, StoreError, TransactionRecord, TransactionStore};
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info};

/// Transaction store persisted as a JSON array of records
pub struct FileStore {
    path: PathBuf,
    history: Mutex<History>,
}

impl FileStore {
    /// Create a store backed by `path`. Nothing is read until [`restore`].
    ///
    /// [`restore`]: TransactionStore::restore
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            history: Mutex::new(History::new()),
        }
    }

    /// Create a store for the node listening on `port` inside `data_dir`
    pub fn for_port<P: AsRef<Path>>(data_dir: P, port: u16) -> Self {
        Self::new(data_dir.as_ref().join(Self::file_name(port)))
    }

    /// Name of the snapshot file for a node listening on `port`
    pub fn file_name(port: u16) -> String {
        format!("transactions_{}.json", port)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, err: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }

    fn write_snapshot(&self, records: &[TransactionRecord]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(records)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        blocking(|| {
            fs::write(&tmp, &bytes)?;
            fs::rename(&tmp, &self.path)
        })
        .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), records = records.len(), "Persisted transactions");
        Ok(())
    }
}

/// Run file IO called from inside the runtime without stalling its workers.
/// `block_in_place` is only available on the multi-thread scheduler.
fn blocking<T>(io: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => tokio::task::block_in_place(io),
        _ => io(),
    }
}

impl TransactionStore for FileStore {
    fn contains(&self, record: &TransactionRecord) -> bool {
        self.history.lock().contains(record)
    }

    fn append(&self, record: TransactionRecord) -> Result<bool, StoreError> {
        let mut history = self.history.lock();
        let before = history.len();

        if !history.insert(record) {
            return Ok(false);
        }

        if let Err(e) = self.write_snapshot(history.records()) {
            history.truncate(before);
            return Err(e);
        }

        Ok(true)
    }

    fn merge(&self, records: Vec<TransactionRecord>) -> Result<MergeReport, StoreError> {
        let mut history = self.history.lock();
        let before = history.len();
        let received = records.len();

        let added = records.into_iter().filter(|r| history.insert(r.clone())).count();

        if added > 0 {
            if let Err(e) = self.write_snapshot(history.records()) {
                history.truncate(before);
                return Err(e);
            }
        }

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
        let history = self.history.lock();
        self.write_snapshot(history.records())
    }

    fn restore(&self) -> Result<usize, StoreError> {
        let bytes = match blocking(|| fs::read(&self.path)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                *self.history.lock() = History::new();
                return Ok(0);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let records: Vec<TransactionRecord> =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        let history = History::from_records(records);
        let loaded = history.len();
        *self.history.lock() = history;

        info!(path = %self.path.display(), count = loaded, "Loaded transactions from file");
        Ok(loaded)
    }

    fn len(&self) -> usize {
        self.history.lock().len()
    }
}
