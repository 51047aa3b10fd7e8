//! Offline queue event stream payloads.

use crate::types::EntryId;

/// Events emitted by [`crate::queue::service::OfflineWorkQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A resource was persisted for later upload.
    Enqueued {
        /// New entry id.
        id: EntryId,
    },
    /// An entry uploaded and was removed.
    Uploaded {
        /// Removed entry id.
        id: EntryId,
    },
    /// An upload attempt failed; the entry stays pending.
    UploadFailed {
        /// Entry id.
        id: EntryId,
        /// Failed attempts so far.
        retry_count: u32,
    },
    /// Pending count after an add or flush.
    PendingCount {
        /// Fresh count from the store.
        count: usize,
    },
}
