//! In-process FIFO mutual exclusion for cooperative tasks.

/// Generic FIFO async mutex with status and forced recovery.
pub mod async_mutex;
/// Sync-pass mutex with timing metrics.
pub mod sync_mutex;
