//! Remote document store abstraction and an in-process implementation.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use hashbrown::HashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures surfaced by a [`DocumentStore`].
#[derive(Debug, Error)]
pub enum DocStoreError {
    /// The caller is not allowed to perform the operation.
    #[error("permission denied")]
    PermissionDenied,
    /// The store could not be reached.
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    /// A document could not be encoded or decoded.
    #[error("document serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    /// Any other backend failure.
    #[error("document store error: {0}")]
    Backend(String),
}

impl DocStoreError {
    /// True for [`DocStoreError::PermissionDenied`].
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied)
    }
}

/// Selects documents for `query` and `subscribe`.
#[derive(Debug, Clone, PartialEq)]
pub enum DocFilter {
    /// Every document.
    All,
    /// Exactly one document id.
    Id(String),
    /// Documents whose top-level `field` equals `value`.
    FieldEquals {
        /// Top-level field name.
        field: String,
        /// Required value.
        value: Value,
    },
}

impl DocFilter {
    /// Filter on a top-level field.
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// True when document `id` with body `doc` is selected.
    pub fn matches(&self, id: &str, doc: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Id(want) => want == id,
            Self::FieldEquals { field, value } => doc.get(field) == Some(value),
        }
    }
}

/// One realtime change; `doc` is `None` when the document is absent or deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct DocChange {
    /// Changed document id.
    pub id: String,
    /// Current body, if the document exists.
    pub doc: Option<Value>,
}

/// Live subscription handle; changes stop once cancelled or dropped.
#[derive(Debug)]
pub struct DocSubscription {
    changes: mpsc::UnboundedReceiver<DocChange>,
}

impl DocSubscription {
    /// Wraps a change channel fed by a store implementation.
    pub fn new(changes: mpsc::UnboundedReceiver<DocChange>) -> Self {
        Self { changes }
    }

    /// Next change, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<DocChange> {
        self.changes.recv().await
    }

    /// Stops delivery.
    pub fn cancel(mut self) {
        self.changes.close();
    }
}

/// Shared remote store holding lock documents keyed by id.
///
/// Implementations must report authorization failures as
/// [`DocStoreError::PermissionDenied`]; callers rely on the variant, not on
/// message text. A new subscription delivers the current state of every
/// selected document (or an absent marker for an [`DocFilter::Id`] filter)
/// before any later changes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one document.
    async fn get(&self, id: &str) -> Result<Option<Value>, DocStoreError>;
    /// Creates or overwrites one document.
    async fn set(&self, id: &str, doc: Value) -> Result<(), DocStoreError>;
    /// Deletes one document; deleting a missing document is not an error.
    async fn delete(&self, id: &str) -> Result<(), DocStoreError>;
    /// Lists `(id, body)` pairs selected by `filter`.
    async fn query(&self, filter: &DocFilter) -> Result<Vec<(String, Value)>, DocStoreError>;
    /// Opens a realtime subscription.
    async fn subscribe(&self, filter: DocFilter) -> Result<DocSubscription, DocStoreError>;
}

struct Subscriber {
    filter: DocFilter,
    tx: mpsc::UnboundedSender<DocChange>,
}

#[derive(Default)]
struct MemoryInner {
    docs: HashMap<String, Value>,
    subscribers: Vec<Subscriber>,
}

impl MemoryInner {
    fn publish(&mut self, id: &str, old: Option<&Value>, new: Option<&Value>) {
        self.subscribers.retain(|s| !s.tx.is_closed());
        for sub in &self.subscribers {
            let selected = match &sub.filter {
                DocFilter::Id(want) => want == id,
                filter => {
                    old.is_some_and(|d| filter.matches(id, d))
                        || new.is_some_and(|d| filter.matches(id, d))
                }
            };
            if selected {
                let _ = sub.tx.send(DocChange {
                    id: id.to_string(),
                    doc: new.cloned(),
                });
            }
        }
    }
}

/// In-process [`DocumentStore`] for single-device use and tests.
#[derive(Default)]
pub struct MemoryDocStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryDocStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.lock_inner().docs.len()
    }

    /// True when no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of subscriptions that are still open.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock_inner();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, DocStoreError> {
        Ok(self.lock_inner().docs.get(id).cloned())
    }

    async fn set(&self, id: &str, doc: Value) -> Result<(), DocStoreError> {
        let mut inner = self.lock_inner();
        let old = inner.docs.insert(id.to_string(), doc.clone());
        inner.publish(id, old.as_ref(), Some(&doc));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), DocStoreError> {
        let mut inner = self.lock_inner();
        if let Some(old) = inner.docs.remove(id) {
            inner.publish(id, Some(&old), None);
        }
        Ok(())
    }

    async fn query(&self, filter: &DocFilter) -> Result<Vec<(String, Value)>, DocStoreError> {
        let inner = self.lock_inner();
        let mut out: Vec<(String, Value)> = inner
            .docs
            .iter()
            .filter(|(id, doc)| filter.matches(id, doc))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn subscribe(&self, filter: DocFilter) -> Result<DocSubscription, DocStoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock_inner();

        match &filter {
            DocFilter::Id(id) => {
                let _ = tx.send(DocChange {
                    id: id.clone(),
                    doc: inner.docs.get(id).cloned(),
                });
            }
            other => {
                let mut initial: Vec<_> = inner
                    .docs
                    .iter()
                    .filter(|(id, doc)| other.matches(id, doc))
                    .collect();
                initial.sort_by(|a, b| a.0.cmp(b.0));
                for (id, doc) in initial {
                    let _ = tx.send(DocChange {
                        id: id.clone(),
                        doc: Some(doc.clone()),
                    });
                }
            }
        }

        inner.subscribers.push(Subscriber { filter, tx });
        Ok(DocSubscription::new(rx))
    }
}
