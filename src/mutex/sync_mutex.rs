//! Mutex dedicated to whole synchronization passes.
//!
//! One instance is constructed by the application and shared (typically via
//! `Arc`) with every sync entry point, so that at most one pass runs at a time.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::{
    config::MutexConfig,
    types::{now_ms, TimestampMs},
};

use super::async_mutex::{AsyncMutex, ForcedRelease, MutexGuard, MutexStatus};

/// Hold-time statistics across completed operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetrics {
    /// Operations that released normally.
    pub operations_completed: u64,
    /// Sum of all hold times.
    pub total_lock_time: Duration,
    /// `total_lock_time / operations_completed`.
    pub average_lock_time: Duration,
    /// Longest single hold time.
    pub max_lock_time: Duration,
    /// Wall-clock time of the most recent completion.
    pub last_operation_time: Option<TimestampMs>,
}

impl SyncMetrics {
    fn record(&mut self, duration: Duration) {
        self.operations_completed += 1;
        self.total_lock_time += duration;
        self.average_lock_time = self
            .total_lock_time
            .checked_div(u32::try_from(self.operations_completed).unwrap_or(u32::MAX))
            .unwrap_or_default();
        self.max_lock_time = self.max_lock_time.max(duration);
        self.last_operation_time = Some(now_ms());
    }
}

/// [`AsyncMutex`] that measures every hold and flags slow ones.
pub struct SyncMutex {
    inner: AsyncMutex,
    metrics: Mutex<SyncMetrics>,
    slow_threshold: Duration,
}

impl SyncMutex {
    /// Creates an idle mutex using `config`'s slow-operation threshold.
    pub fn new(config: &MutexConfig) -> Self {
        Self {
            inner: AsyncMutex::new(),
            metrics: Mutex::new(SyncMetrics::default()),
            slow_threshold: config.slow_operation_threshold(),
        }
    }

    /// Waits for exclusive access; see [`AsyncMutex::acquire`].
    pub async fn acquire(&self, label: Option<&str>) -> SyncGuard<'_> {
        let guard = self.inner.acquire(label).await;
        SyncGuard {
            owner: self,
            guard: Some(guard),
        }
    }

    /// Runs `f` under the lock, releasing and recording metrics on every exit path.
    pub async fn execute<F, Fut, T>(&self, label: Option<&str>, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(label).await;
        f().await
    }

    /// Runs one full synchronization pass. All sync entry points go through here.
    pub async fn run_sync_pass<F, Fut, T>(&self, label: &str, pass: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        debug!(operation = label, status = ?self.inner.status(), "sync pass requested");
        self.execute(Some(label), pass).await
    }

    /// Lock state for diagnostics.
    pub fn status(&self) -> MutexStatus {
        self.inner.status()
    }

    /// Snapshot of the timing metrics.
    pub fn metrics(&self) -> SyncMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recovery escape hatch; logs what was interrupted before clearing.
    ///
    /// See [`AsyncMutex::force_release`] for why this is unsafe in normal operation.
    pub fn force_release(&self) -> ForcedRelease {
        let status = self.inner.status();
        let held_for = self.inner.lock_acquired_at().map(|at| at.elapsed());
        warn!(
            interrupted = ?status.current_operation,
            queue_length = status.queue_length,
            held_for_ms = held_for.map(|d| d.as_millis() as u64),
            metrics = ?self.metrics(),
            "force-releasing sync mutex"
        );
        self.inner.force_release()
    }

    fn record_release(&self, label: Option<&str>, duration: Duration) {
        let snapshot = {
            let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
            metrics.record(duration);
            metrics.clone()
        };

        if duration > self.slow_threshold {
            warn!(
                operation = ?label,
                duration_ms = duration.as_millis() as u64,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                metrics = ?snapshot,
                "slow sync operation"
            );
        } else {
            debug!(
                operation = ?label,
                duration_ms = duration.as_millis() as u64,
                "sync operation released"
            );
        }
    }
}

impl Default for SyncMutex {
    fn default() -> Self {
        Self::new(&MutexConfig::default())
    }
}

impl fmt::Debug for SyncMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncMutex")
            .field("status", &self.status())
            .field("metrics", &self.metrics())
            .field("slow_threshold", &self.slow_threshold)
            .finish()
    }
}

/// Guard for a [`SyncMutex`]; records hold time when released.
#[must_use = "dropping the guard releases the mutex immediately"]
#[derive(Debug)]
pub struct SyncGuard<'a> {
    owner: &'a SyncMutex,
    guard: Option<MutexGuard<'a>>,
}

impl SyncGuard<'_> {
    /// Operation label supplied at acquisition.
    pub fn label(&self) -> Option<&str> {
        self.guard.as_ref().and_then(MutexGuard::label)
    }

    /// True when handed out by a forced release.
    pub fn is_detached(&self) -> bool {
        self.guard.as_ref().is_some_and(MutexGuard::is_detached)
    }

    /// Releases now; equivalent to dropping the guard.
    pub fn release(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let label = guard.label().map(str::to_owned);
        // Measured from the grant, not from when the waiter woke.
        let duration = self
            .owner
            .inner
            .lock_acquired_at()
            .map_or_else(|| guard.held_for(), |granted| granted.elapsed());
        // Forced or detached holds are not completions.
        if guard.release() {
            self.owner.record_release(label.as_deref(), duration);
        }
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
