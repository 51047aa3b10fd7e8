pub mod sqlite;

use thiserror::Error;

use crate::{
    queue::entry::{EntryPatch, EntryStatus, QueueEntry, QueuedResource},
    types::{EntryId, TimestampMs},
};

/// Local durable store failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite rejected a statement.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A payload could not be encoded or decoded.
    #[error("payload serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else.
    #[error("{0}")]
    Message(String),
}

/// Shorthand for local store results.
pub type PersistResult<T> = Result<T, PersistError>;

/// Local durable table of offline queue entries.
///
/// Listing methods return rows in insertion order. New rows start
/// `pending` with a retry count of zero.
pub trait QueueStore: Send {
    /// Inserts a pending row and returns its id.
    fn add(&mut self, resource: &QueuedResource, created_at: TimestampMs) -> PersistResult<EntryId>;
    /// Reads one row.
    fn get(&self, id: EntryId) -> PersistResult<Option<QueueEntry>>;
    /// Applies `patch`; false when the row does not exist.
    fn update(&mut self, id: EntryId, patch: &EntryPatch) -> PersistResult<bool>;
    /// Removes one row; false when it did not exist.
    fn delete(&mut self, id: EntryId) -> PersistResult<bool>;
    /// Counts rows, optionally only those in `status`.
    fn count(&self, status: Option<EntryStatus>) -> PersistResult<usize>;
    /// Lists rows, optionally only those in `status`.
    fn to_array(&self, status: Option<EntryStatus>) -> PersistResult<Vec<QueueEntry>>;
    /// Removes every row; returns how many were removed.
    fn clear(&mut self) -> PersistResult<usize> {
        let mut removed = 0;
        for entry in self.to_array(None)? {
            if self.delete(entry.id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
