//! FIFO async mutex for serializing logical tasks.
//!
//! Waiters are granted the lock strictly in arrival order. Each grant carries
//! an epoch so that a release from a guard that was invalidated by
//! [`AsyncMutex::force_release`] can never unlock a later holder.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Point-in-time view of a mutex, for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexStatus {
    /// True while some holder is active.
    pub locked: bool,
    /// Label of the active holder, if it supplied one.
    pub current_operation: Option<String>,
    /// Number of live waiters queued behind the holder.
    pub queue_length: usize,
}

/// What [`AsyncMutex::force_release`] tore down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedRelease {
    /// Whether the mutex was held when forced.
    pub was_locked: bool,
    /// Label of the holder that was interrupted.
    pub interrupted_operation: Option<String>,
    /// Queued waiters that were woken with a detached guard.
    pub released_waiters: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    Owned(u64),
    Detached,
}

struct Waiter {
    label: Option<String>,
    grant: oneshot::Sender<Grant>,
}

#[derive(Default)]
struct MutexState {
    locked: bool,
    current_operation: Option<String>,
    queue: VecDeque<Waiter>,
    lock_acquired_at: Option<Instant>,
    epoch: u64,
}

impl MutexState {
    fn grant_to(&mut self, label: Option<String>) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.locked = true;
        self.current_operation = label;
        self.lock_acquired_at = Some(Instant::now());
        self.epoch
    }

    fn clear(&mut self) {
        self.locked = false;
        self.current_operation = None;
        self.lock_acquired_at = None;
    }
}

/// Cooperative mutual exclusion with FIFO fairness.
///
/// Unlike `tokio::sync::Mutex` this guards no data; it serializes whole
/// operations and exposes who holds it and how many are waiting.
#[derive(Default)]
pub struct AsyncMutex {
    state: Mutex<MutexState>,
}

impl AsyncMutex {
    /// Creates an idle mutex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until every earlier caller has released, then takes the lock.
    ///
    /// The returned guard releases on drop. Dropping this future while it is
    /// still queued withdraws the caller without disturbing the queue order.
    pub async fn acquire(&self, label: Option<&str>) -> MutexGuard<'_> {
        let label = label.map(str::to_owned);
        let rx = {
            let mut state = self.lock_state();
            if !state.locked {
                let epoch = state.grant_to(label.clone());
                debug!(operation = ?label, "mutex acquired");
                return MutexGuard::new(self, Grant::Owned(epoch), label);
            }

            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter {
                label: label.clone(),
                grant: tx,
            });
            debug!(
                operation = ?label,
                holder = ?state.current_operation,
                queue_length = state.queue.len(),
                "mutex busy, queued"
            );
            rx
        };

        let mut pending = PendingAcquire {
            mutex: self,
            rx,
            settled: false,
        };
        // A dropped sender only happens on teardown; treat it like a forced wake.
        let grant = (&mut pending.rx).await.unwrap_or(Grant::Detached);
        pending.settled = true;
        MutexGuard::new(self, grant, label)
    }

    /// Runs `f` while holding the lock.
    ///
    /// The lock is released on every exit path: normal completion, an error
    /// value returned by `f`, a panic unwinding through here, or the future
    /// being dropped.
    pub async fn execute<F, Fut, T>(&self, label: Option<&str>, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(label).await;
        f().await
    }

    /// Returns lock state for diagnostics.
    pub fn status(&self) -> MutexStatus {
        let state = self.lock_state();
        MutexStatus {
            locked: state.locked,
            current_operation: state.current_operation.clone(),
            queue_length: state.queue.iter().filter(|w| !w.grant.is_closed()).count(),
        }
    }

    /// When the current holder took the lock, if held.
    pub fn lock_acquired_at(&self) -> Option<Instant> {
        self.lock_state().lock_acquired_at
    }

    /// Clears the lock and wakes every waiter at once.
    ///
    /// Recovery tooling only: the in-flight holder is not waited for, and the
    /// woken waiters proceed concurrently with detached guards. Guards issued
    /// before the call become inert.
    pub fn force_release(&self) -> ForcedRelease {
        let (was_locked, interrupted, waiters) = {
            let mut state = self.lock_state();
            let was_locked = state.locked;
            let interrupted = state.current_operation.take();
            state.clear();
            state.epoch = state.epoch.wrapping_add(1);
            let waiters: Vec<Waiter> = state.queue.drain(..).collect();
            (was_locked, interrupted, waiters)
        };

        let released_waiters = waiters
            .into_iter()
            .filter(|w| !w.grant.is_closed())
            .map(|w| w.grant.send(Grant::Detached))
            .filter(Result::is_ok)
            .count();

        debug!(
            was_locked,
            interrupted = ?interrupted,
            released_waiters,
            "mutex force-released"
        );

        ForcedRelease {
            was_locked,
            interrupted_operation: interrupted,
            released_waiters,
        }
    }

    fn release_epoch(&self, epoch: u64) -> bool {
        let mut state = self.lock_state();
        if !state.locked || state.epoch != epoch {
            debug!(epoch, current = state.epoch, "stale mutex release ignored");
            return false;
        }

        while let Some(waiter) = state.queue.pop_front() {
            let next = state.grant_to(waiter.label);
            if waiter.grant.send(Grant::Owned(next)).is_ok() {
                debug!(
                    operation = ?state.current_operation,
                    queue_length = state.queue.len(),
                    "mutex handed to next waiter"
                );
                return true;
            }
        }

        state.clear();
        true
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MutexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for AsyncMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMutex")
            .field("status", &self.status())
            .finish()
    }
}

struct PendingAcquire<'a> {
    mutex: &'a AsyncMutex,
    rx: oneshot::Receiver<Grant>,
    settled: bool,
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Close first so no grant can arrive after the check below.
        self.rx.close();
        if let Ok(Grant::Owned(epoch)) = self.rx.try_recv() {
            self.mutex.release_epoch(epoch);
        }
    }
}

/// Proof of holding an [`AsyncMutex`]; releases on drop.
#[must_use = "dropping the guard releases the mutex immediately"]
pub struct MutexGuard<'a> {
    mutex: &'a AsyncMutex,
    grant: Grant,
    label: Option<String>,
    acquired_at: Instant,
    released: bool,
}

impl<'a> MutexGuard<'a> {
    fn new(mutex: &'a AsyncMutex, grant: Grant, label: Option<String>) -> Self {
        Self {
            mutex,
            grant,
            label,
            acquired_at: Instant::now(),
            released: false,
        }
    }

    /// Operation label supplied at acquisition.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// True when this guard was handed out by a forced release and holds nothing.
    pub fn is_detached(&self) -> bool {
        self.grant == Grant::Detached
    }

    /// Time elapsed since this guard was granted.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Releases now. Returns false if the guard was detached or invalidated
    /// by a forced release in the meantime.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        match self.grant {
            Grant::Owned(epoch) => self.mutex.release_epoch(epoch),
            Grant::Detached => false,
        }
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for MutexGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexGuard")
            .field("label", &self.label)
            .field("detached", &self.is_detached())
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}
