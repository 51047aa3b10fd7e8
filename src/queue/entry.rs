//! Offline queue rows and the resources they carry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EntryId, TimestampMs};

/// Version number for serialized resource payloads.
pub const RESOURCE_FORMAT_VERSION: u16 = 1;

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Waiting for the next flush.
    Pending,
    /// An upload attempt is in flight.
    Processing,
}

impl EntryStatus {
    /// Column value stored in the local table.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
        }
    }

    /// Parses a stored column value.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            _ => None,
        }
    }
}

/// Opaque deferred work item, typically a file and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedResource {
    /// Category used by the uploader to route the resource (e.g. `"receipt"`).
    pub kind: String,
    /// File or item name.
    pub name: String,
    /// MIME type, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Free-form metadata forwarded to the uploader.
    #[serde(default)]
    pub metadata: Value,
    /// Raw content.
    pub data: Vec<u8>,
}

impl QueuedResource {
    /// Resource with no content type or metadata.
    pub fn new(kind: impl Into<String>, name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            content_type: None,
            metadata: Value::Null,
            data,
        }
    }

    /// Sets the MIME type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the metadata document.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Persisted queue row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Row id; ascending ids follow insertion order.
    pub id: EntryId,
    /// Deferred work.
    pub resource: QueuedResource,
    /// Current state.
    pub status: EntryStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Enqueue time.
    pub created_at: TimestampMs,
    /// Start time of the most recent attempt.
    pub last_attempt_at: Option<TimestampMs>,
    /// Failure message from the most recent attempt.
    pub last_error: Option<String>,
}

/// Sparse update where each `Some` field overwrites the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    /// Replacement status.
    pub status: Option<EntryStatus>,
    /// Replacement retry count.
    pub retry_count: Option<u32>,
    /// Replacement attempt time.
    pub last_attempt_at: Option<TimestampMs>,
    /// Replacement failure message.
    pub last_error: Option<String>,
}

impl EntryPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies every set field to `entry`.
    pub fn apply_to(&self, entry: &mut QueueEntry) {
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            entry.retry_count = retry_count;
        }
        if let Some(at) = self.last_attempt_at {
            entry.last_attempt_at = Some(at);
        }
        if let Some(err) = &self.last_error {
            entry.last_error = Some(err.clone());
        }
    }
}
