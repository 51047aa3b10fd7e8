//! Shared primitive IDs, record kinds, and the composite lock key.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;
/// Local durable queue row identifier.
pub type EntryId = i64;

/// Kind of budget record that can be locked for editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordType {
    /// Envelope budget bucket.
    Envelope,
    /// Recurring bill.
    Bill,
    /// Single transaction.
    Transaction,
    /// Savings goal.
    SavingsGoal,
    /// Tracked debt.
    Debt,
    /// Paycheck allocation record.
    Paycheck,
}

impl RecordType {
    /// Wire name used in lock document ids.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Envelope => "envelope",
            Self::Bill => "bill",
            Self::Transaction => "transaction",
            Self::SavingsGoal => "savingsGoal",
            Self::Debt => "debt",
            Self::Paycheck => "paycheck",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown record type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown record type: {0}")]
pub struct UnknownRecordType(pub String);

impl FromStr for RecordType {
    type Err = UnknownRecordType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "envelope" => Ok(Self::Envelope),
            "bill" => Ok(Self::Bill),
            "transaction" => Ok(Self::Transaction),
            "savingsGoal" => Ok(Self::SavingsGoal),
            "debt" => Ok(Self::Debt),
            "paycheck" => Ok(Self::Paycheck),
            other => Err(UnknownRecordType(other.to_string())),
        }
    }
}

/// Composite `(record type, record id)` key identifying one lockable record.
///
/// In-memory registries are keyed by this type; the flattened string form is
/// only produced at the document-store boundary via [`RecordKey::lock_id`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Kind of record.
    pub record_type: RecordType,
    /// Record identifier within its kind.
    pub record_id: String,
}

impl RecordKey {
    /// Builds a key for `record_id` of kind `record_type`.
    pub fn new(record_type: RecordType, record_id: impl Into<String>) -> Self {
        Self {
            record_type,
            record_id: record_id.into(),
        }
    }

    /// Document id of the lock for this record (`"<type>_<id>"`).
    pub fn lock_id(&self) -> String {
        format!("{}_{}", self.record_type.as_str(), self.record_id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.record_type, self.record_id)
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
