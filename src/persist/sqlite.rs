//! SQLite-backed offline queue table.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::{
    queue::entry::{EntryPatch, EntryStatus, QueueEntry, QueuedResource, RESOURCE_FORMAT_VERSION},
    types::{EntryId, TimestampMs},
};

use super::{PersistError, PersistResult, QueueStore};

const SELECT_COLUMNS: &str =
    "SELECT id, status, retry_count, created_at_ms, last_attempt_at_ms, last_error, payload FROM offline_queue";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceEnvelope {
    format_version: u16,
    resource: QueuedResource,
}

/// SQLite implementation of [`crate::persist::QueueStore`].
pub struct SqliteQueueStore {
    conn: Connection,
}

impl SqliteQueueStore {
    /// Opens or creates a queue database at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory queue database.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }
}

impl QueueStore for SqliteQueueStore {
    fn add(&mut self, resource: &QueuedResource, created_at: TimestampMs) -> PersistResult<EntryId> {
        let payload = encode_resource(resource)?;
        self.conn.execute(
            "INSERT INTO offline_queue(status, retry_count, created_at_ms, payload) VALUES (?1, 0, ?2, ?3)",
            params![EntryStatus::Pending.as_str(), created_at as i64, payload],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get(&self, id: EntryId) -> PersistResult<Option<QueueEntry>> {
        let entry = self
            .conn
            .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    fn update(&mut self, id: EntryId, patch: &EntryPatch) -> PersistResult<bool> {
        let Some(mut entry) = self.get(id)? else {
            return Ok(false);
        };
        if patch.is_empty() {
            return Ok(true);
        }
        patch.apply_to(&mut entry);

        let changed = self.conn.execute(
            "UPDATE offline_queue SET status = ?1, retry_count = ?2, last_attempt_at_ms = ?3, last_error = ?4 WHERE id = ?5",
            params![
                entry.status.as_str(),
                i64::from(entry.retry_count),
                entry.last_attempt_at.map(|v| v as i64),
                entry.last_error,
                id,
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete(&mut self, id: EntryId) -> PersistResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM offline_queue WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn count(&self, status: Option<EntryStatus>) -> PersistResult<usize> {
        let count: i64 = match status {
            Some(status) => self.conn.query_row(
                "SELECT COUNT(*) FROM offline_queue WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM offline_queue", [], |row| row.get(0))?,
        };
        usize::try_from(count).map_err(|_| PersistError::Message(format!("negative row count: {count}")))
    }

    fn to_array(&self, status: Option<EntryStatus>) -> PersistResult<Vec<QueueEntry>> {
        let entries = match status {
            Some(status) => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY id ASC"))?;
                let rows = stmt.query_map(params![status.as_str()], row_to_entry)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))?;
                let rows = stmt.query_map([], row_to_entry)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(entries)
    }

    fn clear(&mut self) -> PersistResult<usize> {
        let removed = self.conn.execute("DELETE FROM offline_queue", [])?;
        Ok(removed)
    }
}

fn encode_resource(resource: &QueuedResource) -> PersistResult<Vec<u8>> {
    let envelope = ResourceEnvelope {
        format_version: RESOURCE_FORMAT_VERSION,
        resource: resource.clone(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn decode_resource(payload: &[u8]) -> Result<QueuedResource, String> {
    let envelope: ResourceEnvelope =
        serde_json::from_slice(payload).map_err(|e| format!("resource payload decode failed: {e}"))?;
    if envelope.format_version != RESOURCE_FORMAT_VERSION {
        return Err(format!(
            "unsupported resource format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.resource)
}

fn conversion_error(column: usize, ty: rusqlite::types::Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, ty, Box::new(std::io::Error::other(msg)))
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let id: i64 = row.get(0)?;
    let status_raw: String = row.get(1)?;
    let status = EntryStatus::parse(&status_raw).ok_or_else(|| {
        conversion_error(1, rusqlite::types::Type::Text, format!("unknown status: {status_raw}"))
    })?;
    let retry_count: i64 = row.get(2)?;
    let created_at_ms: i64 = row.get(3)?;
    let last_attempt_at_ms: Option<i64> = row.get(4)?;
    let last_error: Option<String> = row.get(5)?;
    let payload: Vec<u8> = row.get(6)?;
    let resource = decode_resource(&payload)
        .map_err(|err| conversion_error(6, rusqlite::types::Type::Blob, err))?;

    Ok(QueueEntry {
        id,
        resource,
        status,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
        created_at: created_at_ms as TimestampMs,
        last_attempt_at: last_attempt_at_ms.map(|v| v as TimestampMs),
        last_error,
    })
}
