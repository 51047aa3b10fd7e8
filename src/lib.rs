//! Concurrency core for a collaborative budgeting app: an in-process sync
//! mutex, advisory distributed edit locks, a durable offline work queue, and
//! balance invariant checks.
//!
//! # Examples
//!
//! Balance derivation and validation:
//! ```
//! use budgetsync::balance::{
//!     calculate_balances, validate_balances, Envelope, IssueCode, SavingsGoal,
//! };
//!
//! let envelopes = [Envelope::new("groceries", 250.0), Envelope::new("rent", 150.0)];
//! let goals = [SavingsGoal::new("vacation", 100.0)];
//! let mut snapshot = calculate_balances(&envelopes, &[], &goals, Some(500.0));
//! assert_eq!(snapshot.unassigned_cash, 0.0);
//! assert!(validate_balances(&snapshot).is_valid);
//!
//! snapshot.actual_balance = 550.0;
//! let report = validate_balances(&snapshot);
//! assert!(!report.is_valid);
//! assert_eq!(report.errors[0].code, IssueCode::BalanceMismatch);
//! ```
//!
//! Serialized sync passes and an edit lock:
//! ```no_run
//! use std::sync::Arc;
//!
//! use budgetsync::{
//!     config::CoreConfig,
//!     lock::{record::LockOwner, service::DistributedLockService, store::MemoryDocStore},
//!     mutex::sync_mutex::SyncMutex,
//!     types::{RecordKey, RecordType},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cfg = CoreConfig::load("budgetsync.json").unwrap_or_default();
//! let sync = SyncMutex::new(&cfg.mutex);
//! sync.run_sync_pass("full-sync", || async {
//!     // pull, merge, push
//! })
//! .await;
//!
//! let locks = DistributedLockService::new(Arc::new(MemoryDocStore::new()), cfg.lock.clone());
//! locks.initialize(LockOwner::new("user_42"));
//! let key = RecordKey::new(RecordType::Bill, "123");
//! if locks.acquire_lock(&key).await.is_success() {
//!     // edit the bill
//!     let _ = locks.release_lock(&key).await;
//! }
//! locks.cleanup();
//! # }
//! ```
#![deny(missing_docs)]

/// Balance derivation and invariant checks.
pub mod balance;
/// Tunables and JSON config loading.
pub mod config;
/// Distributed advisory edit locks.
pub mod lock;
/// In-process FIFO mutexes.
pub mod mutex;
/// User notification channel.
pub mod notify;
/// Local durable store for the offline queue.
pub mod persist;
/// Offline work queue.
pub mod queue;
/// Shared primitive types.
pub mod types;
