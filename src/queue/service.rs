//! Durable offline work queue with replay on reconnect.
//!
//! Entries are flushed in insertion order, but a failing entry never blocks
//! the ones behind it. There is no retry ceiling and no backoff: an entry that
//! always fails is retried on every reconnect or manual retry until it
//! succeeds or the queue is cleared.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::QueueConfig,
    notify::Notifier,
    persist::{PersistError, PersistResult, QueueStore},
    types::{now_ms, EntryId},
};

use super::{
    entry::{EntryPatch, EntryStatus, QueueEntry, QueuedResource},
    events::QueueEvent,
    network::NetworkStatus,
};

/// Queue failures that reach the caller.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The local store failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// The blocking store task panicked or was cancelled.
    #[error("queue store task failed: {0}")]
    Join(String),
}

/// A retryable upload failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upload failed: {message}")]
pub struct UploadError {
    message: String,
}

impl UploadError {
    /// Failure with a human-readable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Cause text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Sends one deferred resource to its destination.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Uploads `resource`; any error leaves the entry queued.
    async fn upload(&self, resource: &QueuedResource) -> Result<(), UploadError>;
}

/// Why a flush did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The device is offline.
    Offline,
    /// Another flush is running.
    AlreadyFlushing,
}

/// Tally of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries tried.
    pub attempted: usize,
    /// Entries uploaded and removed.
    pub uploaded: usize,
    /// Entries that failed and stay pending.
    pub failed: usize,
    /// Entries left in the store afterwards.
    pub remaining: usize,
}

/// Result of [`OfflineWorkQueue::retry_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was attempted.
    Skipped(SkipReason),
    /// A pass ran to completion.
    Completed(FlushReport),
}

/// Queue snapshot for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    /// Entries waiting for a flush.
    pub pending: usize,
    /// Entries with an upload in flight.
    pub processing: usize,
    /// True while a flush is running.
    pub flushing: bool,
    /// Current connectivity.
    pub online: bool,
}

struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct QueueInner {
    store: Arc<Mutex<Box<dyn QueueStore>>>,
    uploader: Arc<dyn Uploader>,
    notifier: Arc<dyn Notifier>,
    network: NetworkStatus,
    flushing: AtomicBool,
    pending_count: AtomicUsize,
    events_tx: broadcast::Sender<QueueEvent>,
}

/// Persists deferred work locally and replays it when connectivity returns.
///
/// The local store is the source of truth; [`Self::pending_count`] is a cache
/// refreshed from a fresh count after every add and flush.
#[derive(Clone)]
pub struct OfflineWorkQueue {
    inner: Arc<QueueInner>,
}

impl OfflineWorkQueue {
    /// Opens the queue over `store`.
    ///
    /// Entries left `processing` by an interrupted flush are returned to
    /// `pending` before anything else runs.
    pub async fn open(
        store: Box<dyn QueueStore>,
        uploader: Arc<dyn Uploader>,
        notifier: Arc<dyn Notifier>,
        network: NetworkStatus,
        config: &QueueConfig,
    ) -> Result<Self, QueueError> {
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let queue = Self {
            inner: Arc::new(QueueInner {
                store: Arc::new(Mutex::new(store)),
                uploader,
                notifier,
                network,
                flushing: AtomicBool::new(false),
                pending_count: AtomicUsize::new(0),
                events_tx,
            }),
        };

        let recovered = queue.recover_interrupted().await?;
        if recovered > 0 {
            info!(count = recovered, "requeued entries from an interrupted flush");
        }
        let pending = queue.refresh_pending_count().await?;
        info!(pending, online = queue.is_online(), "offline queue opened");
        Ok(queue)
    }

    /// Event stream for observers.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Current connectivity.
    pub fn is_online(&self) -> bool {
        self.inner.network.is_online()
    }

    /// Cached count of entries not yet uploaded.
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Acquire)
    }

    /// Persists `resource`, tells the user, and flushes right away when online.
    pub async fn add_to_queue(&self, resource: QueuedResource) -> Result<EntryId, QueueError> {
        let created_at = now_ms();
        let name = resource.name.clone();
        let id = self
            .with_store(move |store| store.add(&resource, created_at))
            .await?;

        info!(id, name = %name, "resource queued for upload");
        let _ = self.inner.events_tx.send(QueueEvent::Enqueued { id });
        self.inner.notifier.show_success(
            "Saved offline",
            &format!("{name} will upload when a connection is available."),
        );
        self.refresh_pending_count().await?;

        if self.is_online() {
            self.retry_queue().await?;
        }
        Ok(id)
    }

    /// Tries every pending entry once.
    ///
    /// Skips when offline or when a flush is already running. Uploaded entries
    /// are deleted; failed ones get `retry_count + 1` and stay pending. A store
    /// error on one entry counts it as failed and the batch moves on. Rows left
    /// in `processing` by an earlier flush are requeued first.
    pub async fn retry_queue(&self) -> Result<FlushOutcome, QueueError> {
        if !self.is_online() {
            debug!("offline; queue flush skipped");
            return Ok(FlushOutcome::Skipped(SkipReason::Offline));
        }
        let Some(_flushing) = FlushGuard::begin(&self.inner.flushing) else {
            debug!("queue flush already running");
            return Ok(FlushOutcome::Skipped(SkipReason::AlreadyFlushing));
        };

        let requeued = self.recover_interrupted().await?;
        if requeued > 0 {
            warn!(requeued, "requeued entries stranded in processing");
        }

        let entries = self
            .with_store(|store| store.to_array(Some(EntryStatus::Pending)))
            .await?;
        info!(count = entries.len(), "flushing offline queue");

        let mut report = FlushReport::default();
        for entry in entries {
            report.attempted += 1;
            let id = entry.id;
            match self.replay_entry(entry).await {
                Ok(true) => report.uploaded += 1,
                Ok(false) => report.failed += 1,
                Err(err) => {
                    error!(id, error = %err, "queue store failed while replaying entry");
                    report.failed += 1;
                    self.requeue(id).await;
                }
            }
        }

        report.remaining = self.refresh_pending_count().await?;

        if report.failed > 0 {
            self.inner.notifier.show_error(
                "Upload incomplete",
                &format!("{} items failed to upload", report.failed),
            );
        } else if report.uploaded > 0 {
            self.inner.notifier.show_success(
                "Uploads complete",
                &format!("{} queued items uploaded", report.uploaded),
            );
        }

        info!(
            attempted = report.attempted,
            uploaded = report.uploaded,
            failed = report.failed,
            remaining = report.remaining,
            "offline queue flush finished"
        );
        Ok(FlushOutcome::Completed(report))
    }

    async fn replay_entry(&self, entry: QueueEntry) -> Result<bool, QueueError> {
        let id = entry.id;
        let started = now_ms();
        self.with_store(move |store| {
            store.update(
                id,
                &EntryPatch {
                    status: Some(EntryStatus::Processing),
                    last_attempt_at: Some(started),
                    ..EntryPatch::default()
                },
            )
        })
        .await?;

        match self.inner.uploader.upload(&entry.resource).await {
            Ok(()) => {
                self.with_store(move |store| store.delete(id)).await?;
                info!(id, name = %entry.resource.name, "queued resource uploaded");
                let _ = self.inner.events_tx.send(QueueEvent::Uploaded { id });
                Ok(true)
            }
            Err(err) => {
                let retry_count = entry.retry_count.saturating_add(1);
                warn!(id, retry_count, error = %err, "queued upload failed; will retry");
                let message = err.message().to_string();
                self.with_store(move |store| {
                    store.update(
                        id,
                        &EntryPatch {
                            status: Some(EntryStatus::Pending),
                            retry_count: Some(retry_count),
                            last_error: Some(message),
                            ..EntryPatch::default()
                        },
                    )
                })
                .await?;
                let _ = self
                    .inner
                    .events_tx
                    .send(QueueEvent::UploadFailed { id, retry_count });
                Ok(false)
            }
        }
    }

    /// Flushes every time the network comes back online.
    pub fn spawn_reconnect_listener(&self) -> JoinHandle<()> {
        let queue = self.clone();
        let mut network = self.inner.network.clone();
        tokio::spawn(async move {
            while network.wait_online().await.is_some() {
                info!(pending = queue.pending_count(), "back online; replaying offline queue");
                if let Err(err) = queue.retry_queue().await {
                    error!(error = %err, "offline queue replay failed");
                }
            }
            debug!("network monitor closed; reconnect listener exiting");
        })
    }

    /// Re-reads the count of entries not yet uploaded and caches it.
    pub async fn refresh_pending_count(&self) -> Result<usize, QueueError> {
        let count = self.with_store(|store| store.count(None)).await?;
        self.inner.pending_count.store(count, Ordering::Release);
        let _ = self.inner.events_tx.send(QueueEvent::PendingCount { count });
        Ok(count)
    }

    /// Every stored entry, oldest first.
    pub async fn entries(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.with_store(|store| store.to_array(None)).await
    }

    /// Counts by state plus flush and network flags.
    pub async fn queue_status(&self) -> Result<QueueStatus, QueueError> {
        let (pending, processing) = self
            .with_store(|store| {
                Ok((
                    store.count(Some(EntryStatus::Pending))?,
                    store.count(Some(EntryStatus::Processing))?,
                ))
            })
            .await?;
        Ok(QueueStatus {
            pending,
            processing,
            flushing: self.inner.flushing.load(Ordering::Acquire),
            online: self.is_online(),
        })
    }

    /// Deletes every entry; the only way queued work is discarded.
    pub async fn clear_queue(&self) -> Result<usize, QueueError> {
        let removed = self.with_store(|store| store.clear()).await?;
        warn!(removed, "offline queue cleared");
        self.refresh_pending_count().await?;
        Ok(removed)
    }

    async fn requeue(&self, id: EntryId) {
        let reset = self
            .with_store(move |store| {
                store.update(
                    id,
                    &EntryPatch {
                        status: Some(EntryStatus::Pending),
                        ..EntryPatch::default()
                    },
                )
            })
            .await;
        if let Err(err) = reset {
            warn!(id, error = %err, "could not requeue entry; next flush will recover it");
        }
    }

    async fn recover_interrupted(&self) -> Result<usize, QueueError> {
        self.with_store(|store| {
            let stuck = store.to_array(Some(EntryStatus::Processing))?;
            let reset = EntryPatch {
                status: Some(EntryStatus::Pending),
                ..EntryPatch::default()
            };
            for entry in &stuck {
                store.update(entry.id, &reset)?;
            }
            Ok(stuck.len())
        })
        .await
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn QueueStore>) -> PersistResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.inner.store);
        tokio::task::spawn_blocking(move || {
            let mut store = store.blocking_lock();
            f(&mut store)
        })
        .await
        .map_err(|e| QueueError::Join(e.to_string()))?
        .map_err(QueueError::from)
    }
}

impl fmt::Debug for OfflineWorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineWorkQueue")
            .field("pending_count", &self.pending_count())
            .field("flushing", &self.inner.flushing.load(Ordering::Acquire))
            .field("online", &self.is_online())
            .finish()
    }
}
