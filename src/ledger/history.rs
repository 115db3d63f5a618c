// History - insertion-ordered record list with structural dedup
//
// Membership is a linear scan. Records have no identity field and carry an
// f64, so there is no hash that agrees with structural equality.

use crate::ledger::TransactionRecord;

#[derive(Clone, Debug, Default)]
pub struct History {
    records: Vec<TransactionRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from a persisted list, dropping repeated records
    /// (first occurrence wins)
    pub fn from_records(records: Vec<TransactionRecord>) -> Self {
        let mut history = Self::new();
        for record in records {
            history.insert(record);
        }
        history
    }

    pub fn contains(&self, record: &TransactionRecord) -> bool {
        self.records.iter().any(|r| r == record)
    }

    /// Append the record unless an equal one is present.
    /// Returns true if the record was new.
    pub fn insert(&mut self, record: TransactionRecord) -> bool {
        if self.contains(&record) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Drop everything appended after the first `len` records
    pub fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn to_vec(&self) -> Vec<TransactionRecord> {
        self.records.clone()
    }
}
