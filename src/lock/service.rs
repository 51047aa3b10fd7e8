//! Advisory per-record edit locks over a shared document store.
//!
//! Acquisition is a plain read-then-write with no compare-and-swap, so two
//! devices racing on an absent or expired lock can both come away believing
//! they hold it. The lock warns collaborators; it does not make concurrent
//! financial writes safe on its own.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use hashbrown::HashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    config::LockConfig,
    types::{now_ms, RecordKey},
};

use super::{
    record::{LockOwner, LockRecord},
    store::{DocFilter, DocStoreError, DocumentStore},
};

/// Hard lock-service failures.
#[derive(Debug, Error)]
pub enum LockError {
    /// The document store rejected the operation.
    #[error(transparent)]
    Store(#[from] DocStoreError),
    /// A stored lock document could not be decoded.
    #[error("corrupt lock document {lock_id}: {source}")]
    Corrupt {
        /// Offending document id.
        lock_id: String,
        /// Decode failure.
        source: serde_json::Error,
    },
}

impl LockError {
    fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_permission_denied())
    }
}

/// Result of [`DistributedLockService::acquire_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A new lock was written for the caller.
    Acquired,
    /// The caller already held the lock; its heartbeat was refreshed.
    Extended,
    /// Another owner holds an unexpired lock; nothing was written.
    LockedByOther {
        /// The blocking lock.
        holder: LockRecord,
    },
    /// No owner is signed in.
    NotAuthenticated,
    /// The store failed; editing proceeds without a lock.
    LocksDisabled,
}

impl AcquireOutcome {
    /// True when the caller may go ahead and edit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Acquired | Self::Extended | Self::LocksDisabled)
    }

    /// True when the caller now holds the lock.
    pub fn holds_lock(&self) -> bool {
        matches!(self, Self::Acquired | Self::Extended)
    }

    /// Machine-readable reason, absent for a plain acquisition.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Acquired => None,
            Self::Extended => Some("extended_existing"),
            Self::LockedByOther { .. } => Some("locked_by_other"),
            Self::NotAuthenticated => Some("not_authenticated"),
            Self::LocksDisabled => Some("locks_disabled"),
        }
    }

    /// Text for a blocked editor, if the caller should be told anything.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::LockedByOther { holder } => Some(match &holder.owner_name {
                Some(name) => format!("This item is being edited by {name}."),
                None => "This item is being edited by someone else.".to_string(),
            }),
            Self::NotAuthenticated => Some("Sign in to edit shared items.".to_string()),
            _ => None,
        }
    }
}

/// Result of [`DistributedLockService::release_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The remote lock document was deleted.
    Released,
    /// The store denied the delete; local state was dropped anyway.
    ReleasedLocally,
    /// The caller did not hold the lock.
    NotHeld,
}

struct TaskHandle {
    id: u64,
    abort: AbortHandle,
}

impl TaskHandle {
    fn cancel(self) {
        self.abort.abort();
    }
}

#[derive(Default)]
struct LockSlot {
    held: Option<LockRecord>,
    heartbeat: Option<TaskHandle>,
    watcher: Option<TaskHandle>,
}

impl LockSlot {
    fn is_vacant(&self) -> bool {
        self.held.is_none() && self.heartbeat.is_none() && self.watcher.is_none()
    }
}

/// Owning arena of per-record state, indexed by [`RecordKey`].
#[derive(Default)]
struct LockRegistry {
    slots: HashMap<RecordKey, LockSlot>,
}

impl LockRegistry {
    fn slot_mut(&mut self, key: &RecordKey) -> &mut LockSlot {
        self.slots.entry(key.clone()).or_default()
    }

    fn prune(&mut self, key: &RecordKey) {
        if self.slots.get(key).is_some_and(LockSlot::is_vacant) {
            self.slots.remove(key);
        }
    }
}

struct LockInner {
    store: Arc<dyn DocumentStore>,
    config: LockConfig,
    owner: RwLock<Option<LockOwner>>,
    registry: Mutex<LockRegistry>,
    next_task_id: AtomicU64,
}

impl LockInner {
    fn lock_registry(&self) -> std::sync::MutexGuard<'_, LockRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owner(&self) -> Option<LockOwner> {
        self.owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn task_id(&self) -> u64 {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn read_record(&self, key: &RecordKey) -> Result<Option<LockRecord>, LockError> {
        let lock_id = key.lock_id();
        let Some(doc) = self.store.get(&lock_id).await? else {
            return Ok(None);
        };
        decode_record(&lock_id, doc).map(Some)
    }

    async fn write_record(&self, record: &LockRecord) -> Result<(), LockError> {
        let doc = serde_json::to_value(record).map_err(DocStoreError::from)?;
        self.store.set(&record.lock_id, doc).await?;
        Ok(())
    }

    fn held(&self, key: &RecordKey) -> Option<LockRecord> {
        self.lock_registry()
            .slots
            .get(key)
            .and_then(|slot| slot.held.clone())
    }

    fn hold(&self, key: &RecordKey, record: LockRecord) {
        self.lock_registry().slot_mut(key).held = Some(record);
    }

    fn refresh_held(&self, key: &RecordKey, record: LockRecord) {
        let mut registry = self.lock_registry();
        if let Some(held) = registry.slots.get_mut(key).and_then(|s| s.held.as_mut()) {
            *held = record;
        }
    }

    /// Drops the held record and stops its heartbeat.
    fn forget(&self, key: &RecordKey) -> Option<LockRecord> {
        let mut registry = self.lock_registry();
        let slot = registry.slots.get_mut(key)?;
        let held = slot.held.take();
        if let Some(hb) = slot.heartbeat.take() {
            hb.cancel();
        }
        registry.prune(key);
        held
    }

    fn has_heartbeat(&self, key: &RecordKey) -> bool {
        self.lock_registry()
            .slots
            .get(key)
            .and_then(|slot| slot.heartbeat.as_ref())
            .is_some_and(|hb| !hb.abort.is_finished())
    }

    fn install_heartbeat(&self, key: &RecordKey, handle: TaskHandle) {
        let mut registry = self.lock_registry();
        if let Some(old) = registry.slot_mut(key).heartbeat.replace(handle) {
            old.cancel();
        }
    }

    fn clear_heartbeat(&self, key: &RecordKey, id: u64) {
        let mut registry = self.lock_registry();
        if let Some(slot) = registry.slots.get_mut(key) {
            if slot.heartbeat.as_ref().is_some_and(|h| h.id == id) {
                slot.heartbeat = None;
            }
        }
        registry.prune(key);
    }

    /// Drops the held record from inside heartbeat `id` once the lock was lost.
    /// A newer heartbeat for the same key keeps its record.
    fn drop_lost(&self, key: &RecordKey, id: u64) {
        let mut registry = self.lock_registry();
        if let Some(slot) = registry.slots.get_mut(key) {
            if slot.heartbeat.as_ref().is_some_and(|h| h.id == id) {
                slot.heartbeat = None;
                slot.held = None;
            }
        }
        registry.prune(key);
    }

    fn install_watcher(&self, key: &RecordKey, handle: TaskHandle) {
        let mut registry = self.lock_registry();
        if let Some(old) = registry.slot_mut(key).watcher.replace(handle) {
            old.cancel();
        }
    }

    fn clear_watcher(&self, key: &RecordKey, id: u64) -> bool {
        let mut registry = self.lock_registry();
        let mut cleared = false;
        if let Some(slot) = registry.slots.get_mut(key) {
            if slot.watcher.as_ref().is_some_and(|w| w.id == id) {
                if let Some(w) = slot.watcher.take() {
                    w.cancel();
                    cleared = true;
                }
            }
        }
        registry.prune(key);
        cleared
    }

    fn start_heartbeat(self: &Arc<Self>, key: &RecordKey) {
        let id = self.task_id();
        let period = self.config.heartbeat_interval();
        let inner = Arc::clone(self);
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(mut record) = inner.held(&task_key) else {
                    break;
                };
                match inner.read_record(&task_key).await {
                    Ok(Some(remote)) if remote.is_owned_by(&record.owner_id) => {}
                    Ok(remote) => {
                        warn!(
                            key = %task_key,
                            holder = remote.as_ref().map(|r| r.owner_id.as_str()),
                            "lock lost to another owner; stopping heartbeat"
                        );
                        inner.drop_lost(&task_key, id);
                        return;
                    }
                    Err(err) => {
                        warn!(
                            key = %task_key,
                            error = %err,
                            "lock heartbeat could not read lock; stopping, lock will expire"
                        );
                        break;
                    }
                }
                record.renew(now_ms(), inner.config.ttl_ms);
                match inner.write_record(&record).await {
                    Ok(()) => {
                        debug!(key = %task_key, at = record.last_heartbeat_at, "lock heartbeat");
                        inner.refresh_held(&task_key, record);
                    }
                    Err(err) => {
                        warn!(
                            key = %task_key,
                            error = %err,
                            "lock heartbeat failed; stopping, lock will expire"
                        );
                        break;
                    }
                }
            }
            inner.clear_heartbeat(&task_key, id);
        });

        self.install_heartbeat(
            key,
            TaskHandle {
                id,
                abort: task.abort_handle(),
            },
        );
    }
}

fn decode_record(lock_id: &str, doc: Value) -> Result<LockRecord, LockError> {
    serde_json::from_value(doc).map_err(|source| LockError::Corrupt {
        lock_id: lock_id.to_string(),
        source,
    })
}

/// Per-record advisory edit locks with heartbeats and realtime watches.
///
/// Clones share the same registry. All in-memory lock state (held records,
/// heartbeat tasks, watchers) lives in one arena keyed by [`RecordKey`] and is
/// only mutated through this type.
#[derive(Clone)]
pub struct DistributedLockService {
    inner: Arc<LockInner>,
}

impl DistributedLockService {
    /// Creates a service over `store`; no owner is signed in yet.
    pub fn new(store: Arc<dyn DocumentStore>, config: LockConfig) -> Self {
        Self {
            inner: Arc::new(LockInner {
                store,
                config,
                owner: RwLock::new(None),
                registry: Mutex::new(LockRegistry::default()),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    /// Sets the identity used for subsequent acquisitions.
    pub fn initialize(&self, owner: LockOwner) {
        info!(owner = %owner.id, "lock service initialized");
        *self.inner.owner.write().unwrap_or_else(PoisonError::into_inner) = Some(owner);
    }

    /// Signed-in identity, if any.
    pub fn owner(&self) -> Option<LockOwner> {
        self.inner.owner()
    }

    /// Drops all local state and forgets the signed-in identity.
    pub fn sign_out(&self) {
        self.cleanup();
        *self.inner.owner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Tries to take the edit lock for `key`.
    ///
    /// Store failures never surface here: they degrade to
    /// [`AcquireOutcome::LocksDisabled`] so editing stays possible offline.
    pub async fn acquire_lock(&self, key: &RecordKey) -> AcquireOutcome {
        let Some(owner) = self.owner() else {
            debug!(%key, "lock requested without a signed-in owner");
            return AcquireOutcome::NotAuthenticated;
        };

        match self.try_acquire(key, &owner).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%key, error = %err, "edit locks unavailable; continuing without a lock");
                AcquireOutcome::LocksDisabled
            }
        }
    }

    async fn try_acquire(
        &self,
        key: &RecordKey,
        owner: &LockOwner,
    ) -> Result<AcquireOutcome, LockError> {
        let ttl = self.inner.config.ttl_ms;
        let now = now_ms();

        match self.inner.read_record(key).await? {
            Some(mut record) if record.is_owned_by(&owner.id) => {
                record.renew(now, ttl);
                record.extended = true;
                self.inner.write_record(&record).await?;
                self.inner.hold(key, record);
                if !self.inner.has_heartbeat(key) {
                    self.inner.start_heartbeat(key);
                }
                info!(%key, owner = %owner.id, "extended existing lock");
                Ok(AcquireOutcome::Extended)
            }
            Some(record) if !record.is_expired(now, ttl) => {
                if self.inner.forget(key).is_some() {
                    warn!(%key, holder = %record.owner_id, "local lock was taken over");
                }
                info!(%key, holder = %record.owner_id, "record locked by another owner");
                Ok(AcquireOutcome::LockedByOther { holder: record })
            }
            stale => {
                if let Some(prev) = &stale {
                    debug!(%key, previous_owner = %prev.owner_id, "superseding expired lock");
                }
                self.inner.forget(key);
                let record = LockRecord::new(key, owner, now, ttl);
                self.inner.write_record(&record).await?;
                self.inner.hold(key, record);
                self.inner.start_heartbeat(key);
                info!(%key, owner = %owner.id, "lock acquired");
                Ok(AcquireOutcome::Acquired)
            }
        }
    }

    /// Gives up the lock for `key` and stops its heartbeat.
    ///
    /// The remote record is only deleted while it still belongs to the
    /// caller; a lock taken over after expiry reads as [`ReleaseOutcome::NotHeld`].
    /// A permission-denied read or delete still counts as released. Any other
    /// store failure is returned; local state is dropped either way and the
    /// remote record will expire.
    pub async fn release_lock(&self, key: &RecordKey) -> Result<ReleaseOutcome, LockError> {
        let held = self.inner.forget(key);
        let Some(owner_id) = held
            .map(|record| record.owner_id)
            .or_else(|| self.owner().map(|owner| owner.id))
        else {
            return Ok(ReleaseOutcome::NotHeld);
        };

        match self.inner.read_record(key).await {
            Ok(Some(record)) if record.is_owned_by(&owner_id) => {}
            Ok(Some(record)) => {
                info!(%key, holder = %record.owner_id, "lock now held by another owner; leaving it");
                return Ok(ReleaseOutcome::NotHeld);
            }
            Ok(None) => return Ok(ReleaseOutcome::NotHeld),
            Err(err) if err.is_permission_denied() => {
                warn!(%key, "permission denied reading lock; treating as released");
                return Ok(ReleaseOutcome::ReleasedLocally);
            }
            Err(err) => return Err(err),
        }

        match self.inner.store.delete(&key.lock_id()).await {
            Ok(()) => {
                info!(%key, "lock released");
                Ok(ReleaseOutcome::Released)
            }
            Err(err) if err.is_permission_denied() => {
                warn!(%key, "permission denied releasing lock; treating as released");
                Ok(ReleaseOutcome::ReleasedLocally)
            }
            Err(err) => {
                error!(%key, error = %err, "failed to release lock");
                Err(err.into())
            }
        }
    }

    /// Reads the current lock for `key`; permission denied reads as no lock.
    pub async fn get_lock(&self, key: &RecordKey) -> Result<Option<LockRecord>, LockError> {
        match self.inner.read_record(key).await {
            Err(err) if err.is_permission_denied() => {
                debug!(%key, "permission denied reading lock; treating as unlocked");
                Ok(None)
            }
            other => other,
        }
    }

    /// Calls `callback` with the lock state now and after every remote change.
    ///
    /// The returned [`LockWatch`] owns the subscription; dropping it or calling
    /// [`LockWatch::unsubscribe`] stops delivery. Watching a key again replaces
    /// the previous watch.
    pub async fn watch_lock<F>(&self, key: &RecordKey, mut callback: F) -> Result<LockWatch, LockError>
    where
        F: FnMut(Option<LockRecord>) + Send + 'static,
    {
        let lock_id = key.lock_id();
        let mut subscription = self
            .inner
            .store
            .subscribe(DocFilter::Id(lock_id.clone()))
            .await?;

        let id = self.inner.task_id();
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            while let Some(change) = subscription.next().await {
                let lock = match change.doc {
                    None => None,
                    Some(doc) => match decode_record(&lock_id, doc) {
                        Ok(record) => Some(record),
                        Err(err) => {
                            warn!(key = %task_key, error = %err, "ignoring undecodable lock document");
                            continue;
                        }
                    },
                };
                callback(lock);
            }
            inner.clear_watcher(&task_key, id);
        });

        let abort = task.abort_handle();
        self.inner.install_watcher(
            key,
            TaskHandle {
                id,
                abort: abort.clone(),
            },
        );
        debug!(%key, "watching lock");

        Ok(LockWatch {
            key: key.clone(),
            id,
            abort,
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Stops the registered watch for `key`, if any.
    pub fn unwatch_lock(&self, key: &RecordKey) -> bool {
        let mut registry = self.inner.lock_registry();
        let Some(watcher) = registry.slots.get_mut(key).and_then(|s| s.watcher.take()) else {
            return false;
        };
        watcher.cancel();
        registry.prune(key);
        true
    }

    /// True when this process believes it holds `key`; no network round trip.
    pub fn owns_lock(&self, key: &RecordKey) -> bool {
        let Some(owner) = self.owner() else {
            return false;
        };
        self.inner
            .held(key)
            .is_some_and(|record| record.is_owned_by(&owner.id))
    }

    /// True while a heartbeat task is renewing `key`.
    pub fn has_heartbeat(&self, key: &RecordKey) -> bool {
        self.inner.has_heartbeat(key)
    }

    /// Unexpired locks held by `owner_id`, as seen by the store.
    pub async fn locks_held_by(&self, owner_id: &str) -> Result<Vec<LockRecord>, LockError> {
        let now = now_ms();
        let ttl = self.inner.config.ttl_ms;
        let docs = self
            .inner
            .store
            .query(&DocFilter::field_equals("ownerId", owner_id))
            .await?;

        let mut out = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            let record = decode_record(&id, doc)?;
            if !record.is_expired(now, ttl) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Releases every lock this process holds; returns how many were released.
    ///
    /// Failures are logged and skipped so one bad record cannot block sign-out.
    pub async fn release_all_locks(&self) -> usize {
        let keys: Vec<RecordKey> = self
            .inner
            .lock_registry()
            .slots
            .iter()
            .filter(|(_, slot)| slot.held.is_some())
            .map(|(key, _)| key.clone())
            .collect();

        let mut released = 0;
        for key in keys {
            match self.release_lock(&key).await {
                Ok(ReleaseOutcome::NotHeld) => {}
                Ok(_) => released += 1,
                Err(err) => warn!(%key, error = %err, "could not release lock during release-all"),
            }
        }
        released
    }

    /// Cancels every watcher and heartbeat and forgets all held locks.
    ///
    /// Remote records are left to expire; call [`Self::release_all_locks`]
    /// first to delete them.
    pub fn cleanup(&self) {
        let slots = std::mem::take(&mut self.inner.lock_registry().slots);
        let count = slots.len();
        for (_, slot) in slots {
            if let Some(hb) = slot.heartbeat {
                hb.cancel();
            }
            if let Some(w) = slot.watcher {
                w.cancel();
            }
        }
        info!(records = count, "lock service cleaned up");
    }
}

impl fmt::Debug for DistributedLockService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.lock_registry();
        f.debug_struct("DistributedLockService")
            .field("owner", &self.inner.owner().map(|o| o.id))
            .field("records", &registry.slots.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Caller-owned realtime watch on one lock; stops when dropped.
pub struct LockWatch {
    key: RecordKey,
    id: u64,
    abort: AbortHandle,
    inner: Weak<LockInner>,
}

impl LockWatch {
    /// Record being watched.
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// False once the watch has been cancelled or its subscription ended.
    pub fn is_active(&self) -> bool {
        !self.abort.is_finished()
    }

    /// Stops delivery and removes the watch from the service registry.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for LockWatch {
    fn drop(&mut self) {
        self.abort.abort();
        if let Some(inner) = self.inner.upgrade() {
            inner.clear_watcher(&self.key, self.id);
        }
    }
}

impl fmt::Debug for LockWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockWatch")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}
