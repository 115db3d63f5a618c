use serde::{Deserialize, Serialize};
use std::fmt;

/// A transfer of `amount` from `sender` to `recipient`
///
/// Records carry no identifier: two records are the same record when all
/// three fields are equal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
}

impl TransactionRecord {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, amount: f64) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
        }
    }

    /// True if the record can be carried on the JSON wire unchanged
    pub fn is_representable(&self) -> bool {
        self.amount.is_finite()
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.sender, self.recipient, self.amount)
    }
}
