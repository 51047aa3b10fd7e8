use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use budgetsync::{
    config::LockConfig,
    lock::{
        record::{LockOwner, LockRecord},
        service::{AcquireOutcome, DistributedLockService, LockError, ReleaseOutcome},
        store::{DocFilter, DocStoreError, DocSubscription, DocumentStore, MemoryDocStore},
    },
    types::{now_ms, RecordKey, RecordType},
};

/// Memory store with switchable failures and a write counter.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryDocStore,
    sets: AtomicUsize,
    fail_get: AtomicBool,
    deny_get: AtomicBool,
    fail_set: AtomicBool,
    deny_delete: AtomicBool,
    fail_delete: AtomicBool,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, DocStoreError> {
        if self.deny_get.load(Ordering::SeqCst) {
            return Err(DocStoreError::PermissionDenied);
        }
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(DocStoreError::Unavailable("offline".to_string()));
        }
        self.inner.get(id).await
    }

    async fn set(&self, id: &str, doc: Value) -> Result<(), DocStoreError> {
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(DocStoreError::Unavailable("offline".to_string()));
        }
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(id, doc).await
    }

    async fn delete(&self, id: &str) -> Result<(), DocStoreError> {
        if self.deny_delete.load(Ordering::SeqCst) {
            return Err(DocStoreError::PermissionDenied);
        }
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(DocStoreError::Backend("write rejected".to_string()));
        }
        self.inner.delete(id).await
    }

    async fn query(&self, filter: &DocFilter) -> Result<Vec<(String, Value)>, DocStoreError> {
        self.inner.query(filter).await
    }

    async fn subscribe(&self, filter: DocFilter) -> Result<DocSubscription, DocStoreError> {
        self.inner.subscribe(filter).await
    }
}

fn bill(id: &str) -> RecordKey {
    RecordKey::new(RecordType::Bill, id)
}

fn service_for(store: Arc<dyn DocumentStore>, owner: &str) -> DistributedLockService {
    let svc = DistributedLockService::new(store, LockConfig::default());
    svc.initialize(LockOwner::new(owner));
    svc
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn reacquire_by_owner_extends_without_duplicating() {
    let store = Arc::new(MemoryDocStore::new());
    let svc = service_for(store.clone(), "user_a");
    let key = bill("123");

    let first = svc.acquire_lock(&key).await;
    assert_eq!(first, AcquireOutcome::Acquired);
    assert!(first.is_success());
    assert_eq!(first.reason(), None);
    assert!(svc.owns_lock(&key));
    assert!(svc.has_heartbeat(&key));
    assert_eq!(store.len(), 1);

    let second = svc.acquire_lock(&key).await;
    assert_eq!(second, AcquireOutcome::Extended);
    assert!(second.is_success());
    assert_eq!(second.reason(), Some("extended_existing"));
    assert_eq!(store.len(), 1);

    let record = svc.get_lock(&key).await.expect("get").expect("present");
    assert_eq!(record.lock_id, "bill_123");
    assert_eq!(record.owner_id, "user_a");
    assert!(record.extended);

    svc.cleanup();
}

#[tokio::test]
async fn unexpired_lock_blocks_other_owner() {
    let store = Arc::new(MemoryDocStore::new());
    let alice = DistributedLockService::new(store.clone(), LockConfig::default());
    alice.initialize(LockOwner::new("user_a").with_display_name("Alice"));
    let bob = service_for(store.clone(), "user_b");
    let key = bill("123");

    assert_eq!(alice.acquire_lock(&key).await, AcquireOutcome::Acquired);

    let blocked = bob.acquire_lock(&key).await;
    assert!(!blocked.is_success());
    assert_eq!(blocked.reason(), Some("locked_by_other"));
    match &blocked {
        AcquireOutcome::LockedByOther { holder } => assert_eq!(holder.owner_id, "user_a"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        blocked.user_message().as_deref(),
        Some("This item is being edited by Alice.")
    );
    assert!(!bob.owns_lock(&key));
    assert!(!bob.has_heartbeat(&key));

    let record = bob.get_lock(&key).await.expect("get").expect("present");
    assert_eq!(record.owner_id, "user_a");
    assert_eq!(store.len(), 1);

    alice.cleanup();
}

#[tokio::test]
async fn expired_lock_is_superseded() {
    let store = Arc::new(MemoryDocStore::new());
    let cfg = LockConfig::default();
    let key = bill("123");

    let stale = LockRecord::new(
        &key,
        &LockOwner::new("user_a"),
        now_ms() - cfg.ttl_ms - 60_000,
        cfg.ttl_ms,
    );
    store
        .set(&key.lock_id(), serde_json::to_value(&stale).expect("encode"))
        .await
        .expect("seed");

    let bob = service_for(store.clone(), "user_b");
    assert_eq!(bob.acquire_lock(&key).await, AcquireOutcome::Acquired);

    let record = bob.get_lock(&key).await.expect("get").expect("present");
    assert_eq!(record.owner_id, "user_b");
    assert!(!record.extended);
    assert!(!record.is_expired(now_ms(), cfg.ttl_ms));
    bob.cleanup();
}

#[tokio::test]
async fn acquire_without_owner_is_not_authenticated() {
    let store = Arc::new(MemoryDocStore::new());
    let svc = DistributedLockService::new(store.clone(), LockConfig::default());

    let outcome = svc.acquire_lock(&bill("1")).await;
    assert_eq!(outcome, AcquireOutcome::NotAuthenticated);
    assert!(!outcome.is_success());
    assert_eq!(outcome.reason(), Some("not_authenticated"));
    assert!(store.is_empty());

    svc.initialize(LockOwner::new("user_a"));
    assert!(svc.acquire_lock(&bill("1")).await.holds_lock());
    svc.sign_out();
    assert!(svc.owner().is_none());
    assert!(!svc.owns_lock(&bill("1")));
    assert_eq!(svc.acquire_lock(&bill("2")).await, AcquireOutcome::NotAuthenticated);
}

#[tokio::test]
async fn unreachable_store_degrades_to_locks_disabled() {
    let store = Arc::new(FlakyStore::default());
    store.fail_get.store(true, Ordering::SeqCst);
    let svc = service_for(store.clone(), "user_a");
    let key = RecordKey::new(RecordType::Envelope, "groceries");

    let outcome = svc.acquire_lock(&key).await;
    assert_eq!(outcome, AcquireOutcome::LocksDisabled);
    assert!(outcome.is_success());
    assert!(!outcome.holds_lock());
    assert_eq!(outcome.reason(), Some("locks_disabled"));
    assert!(!svc.owns_lock(&key));
    assert!(!svc.has_heartbeat(&key));
}

#[tokio::test]
async fn release_deletes_record_and_stops_heartbeat() {
    let store = Arc::new(MemoryDocStore::new());
    let svc = service_for(store.clone(), "user_a");
    let key = bill("123");

    svc.acquire_lock(&key).await;
    let released = svc.release_lock(&key).await.expect("release");
    assert_eq!(released, ReleaseOutcome::Released);
    assert!(store.is_empty());
    assert!(!svc.owns_lock(&key));
    assert!(!svc.has_heartbeat(&key));

    let again = svc.release_lock(&key).await.expect("release again");
    assert_eq!(again, ReleaseOutcome::NotHeld);
}

#[tokio::test]
async fn release_never_deletes_someone_elses_lock() {
    let store = Arc::new(MemoryDocStore::new());
    let alice = service_for(store.clone(), "user_a");
    let bob = service_for(store.clone(), "user_b");
    let key = bill("9");

    alice.acquire_lock(&key).await;
    let outcome = bob.release_lock(&key).await.expect("release");
    assert_eq!(outcome, ReleaseOutcome::NotHeld);
    assert_eq!(store.len(), 1);
    alice.cleanup();
}

#[tokio::test]
async fn permission_denied_release_is_soft_success() {
    let store = Arc::new(FlakyStore::default());
    let svc = service_for(store.clone(), "user_a");
    let key = bill("123");

    svc.acquire_lock(&key).await;
    store.deny_delete.store(true, Ordering::SeqCst);

    let outcome = svc.release_lock(&key).await.expect("soft success");
    assert_eq!(outcome, ReleaseOutcome::ReleasedLocally);
    assert!(!svc.owns_lock(&key));
    assert!(!svc.has_heartbeat(&key));
}

#[tokio::test]
async fn other_release_failures_are_surfaced() {
    let store = Arc::new(FlakyStore::default());
    let svc = service_for(store.clone(), "user_a");
    let key = bill("123");

    svc.acquire_lock(&key).await;
    store.fail_delete.store(true, Ordering::SeqCst);

    let err = svc.release_lock(&key).await.expect_err("hard failure");
    assert!(matches!(err, LockError::Store(DocStoreError::Backend(_))));
    assert!(!svc.owns_lock(&key));
}

#[tokio::test]
async fn permission_denied_read_is_treated_as_unlocked() {
    let store = Arc::new(FlakyStore::default());
    let svc = service_for(store.clone(), "user_a");
    let key = bill("123");

    svc.acquire_lock(&key).await;
    store.deny_get.store(true, Ordering::SeqCst);
    assert_eq!(svc.get_lock(&key).await.expect("soft"), None);

    store.deny_get.store(false, Ordering::SeqCst);
    store.fail_get.store(true, Ordering::SeqCst);
    assert!(svc.get_lock(&key).await.is_err());
    svc.cleanup();
}

#[tokio::test(start_paused = true)]
async fn heartbeat_renews_then_stops_after_write_failure() {
    let cfg = LockConfig::default();
    let store = Arc::new(FlakyStore::default());
    let svc = DistributedLockService::new(store.clone(), cfg.clone());
    svc.initialize(LockOwner::new("user_a"));
    let key = bill("123");

    svc.acquire_lock(&key).await;
    assert_eq!(store.sets.load(Ordering::SeqCst), 1);

    tokio::time::sleep(cfg.heartbeat_interval() + Duration::from_millis(100)).await;
    assert_eq!(store.sets.load(Ordering::SeqCst), 2);
    assert!(svc.has_heartbeat(&key));

    store.fail_set.store(true, Ordering::SeqCst);
    tokio::time::sleep(cfg.heartbeat_interval()).await;
    tokio::task::yield_now().await;
    assert!(!svc.has_heartbeat(&key));

    store.fail_set.store(false, Ordering::SeqCst);
    tokio::time::sleep(cfg.heartbeat_interval() * 3).await;
    assert_eq!(store.sets.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn watch_reports_changes_until_unsubscribed() {
    let store = Arc::new(MemoryDocStore::new());
    let alice = service_for(store.clone(), "user_a");
    let observer = service_for(store.clone(), "user_b");
    let key = bill("123");

    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let watch = observer
        .watch_lock(&key, move |lock| {
            sink.lock().expect("seen").push(lock.map(|r| r.owner_id));
        })
        .await
        .expect("watch");
    assert_eq!(watch.key(), &key);
    assert!(watch.is_active());

    eventually(|| seen.lock().expect("seen").len() == 1).await;

    alice.acquire_lock(&key).await;
    eventually(|| seen.lock().expect("seen").len() == 2).await;

    alice.release_lock(&key).await.expect("release");
    eventually(|| seen.lock().expect("seen").len() == 3).await;

    assert_eq!(
        *seen.lock().expect("seen"),
        vec![None, Some("user_a".to_string()), None]
    );

    watch.unsubscribe();
    assert!(!observer.unwatch_lock(&key));
    eventually(|| store.subscriber_count() == 0).await;

    alice.acquire_lock(&key).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.lock().expect("seen").len(), 3);
    alice.cleanup();
}

#[tokio::test]
async fn unwatch_by_key_stops_delivery() {
    let store = Arc::new(MemoryDocStore::new());
    let svc = service_for(store.clone(), "user_a");
    let key = RecordKey::new(RecordType::SavingsGoal, "vacation");

    let _watch = svc.watch_lock(&key, |_| {}).await.expect("watch");
    assert_eq!(store.subscriber_count(), 1);
    assert!(svc.unwatch_lock(&key));
    eventually(|| store.subscriber_count() == 0).await;
}

#[tokio::test]
async fn cleanup_drops_every_local_handle() {
    let store = Arc::new(MemoryDocStore::new());
    let svc = service_for(store.clone(), "user_a");
    let a = bill("1");
    let b = RecordKey::new(RecordType::Debt, "car");

    svc.acquire_lock(&a).await;
    svc.acquire_lock(&b).await;
    let watch = svc.watch_lock(&a, |_| {}).await.expect("watch");

    svc.cleanup();
    assert!(!svc.owns_lock(&a));
    assert!(!svc.owns_lock(&b));
    assert!(!svc.has_heartbeat(&a));
    assert!(!svc.has_heartbeat(&b));
    eventually(|| store.subscriber_count() == 0).await;
    assert!(!watch.is_active());

    // Remote records are left to expire.
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn release_all_and_query_by_owner() {
    let store = Arc::new(MemoryDocStore::new());
    let alice = service_for(store.clone(), "user_a");
    let bob = service_for(store.clone(), "user_b");

    alice.acquire_lock(&bill("1")).await;
    alice.acquire_lock(&bill("2")).await;
    bob.acquire_lock(&bill("3")).await;

    let held = alice.locks_held_by("user_a").await.expect("query");
    let mut ids: Vec<_> = held.into_iter().map(|r| r.record_id).collect();
    ids.sort();
    assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);

    assert_eq!(alice.release_all_locks().await, 2);
    assert_eq!(store.len(), 1);
    assert!(alice.locks_held_by("user_a").await.expect("query").is_empty());
    bob.cleanup();
}

#[test]
fn owner_resolution_precedence() {
    assert_eq!(LockOwner::resolve(Some("uid-1"), Some("b-9"), Some("Ann")).id, "uid-1");
    assert_eq!(LockOwner::resolve(None, Some("b-9"), Some("Ann")).id, "b-9");
    assert_eq!(LockOwner::resolve(Some(""), None, Some("Ann Lee!")).id, "user_ann_lee_");
    assert_eq!(LockOwner::resolve(None, None, None).id, "anonymous");

    let owner = LockOwner::resolve(None, Some("b-9"), Some("Ann"));
    assert_eq!(owner.display_name.as_deref(), Some("Ann"));
    assert_eq!(owner.budget_id.as_deref(), Some("b-9"));
}

#[test]
fn expiry_is_measured_from_last_heartbeat() {
    let key = RecordKey::new(RecordType::Paycheck, "p1");
    let mut record = LockRecord::new(&key, &LockOwner::new("user_a"), 1_000, 60_000);
    assert_eq!(record.expires_at, 61_000);
    assert_eq!(record.key(), key);
    assert!(!record.is_expired(61_000, 60_000));
    assert!(record.is_expired(61_001, 60_000));
    assert_eq!(record.time_remaining(31_000, 60_000), 30_000);
    assert_eq!(record.time_remaining(90_000, 60_000), 0);

    record.renew(50_000, 60_000);
    assert!(!record.is_expired(100_000, 60_000));
    assert_eq!(record.expires_at, 110_000);
    assert!(record.is_owned_by("user_a"));
    assert!(!record.is_owned_by(""));
}

fn short_lived(store: Arc<dyn DocumentStore>, owner: &str, heartbeat_ms: u64) -> DistributedLockService {
    let cfg = LockConfig {
        ttl_ms: 50,
        heartbeat_interval_ms: heartbeat_ms,
    };
    let svc = DistributedLockService::new(store, cfg);
    svc.initialize(LockOwner::new(owner));
    svc
}

/// Lets alice's lock lapse and hands it to bob.
async fn take_over_after_expiry(
    store: &Arc<MemoryDocStore>,
    key: &RecordKey,
) -> (DistributedLockService, DistributedLockService) {
    let alice = short_lived(store.clone(), "user_a", 10_000);
    let bob = short_lived(store.clone(), "user_b", 10_000);

    assert_eq!(alice.acquire_lock(key).await, AcquireOutcome::Acquired);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(bob.acquire_lock(key).await, AcquireOutcome::Acquired);
    (alice, bob)
}

#[tokio::test]
async fn release_after_takeover_leaves_new_owner_in_place() {
    let store = Arc::new(MemoryDocStore::new());
    let key = bill("123");
    let (alice, bob) = take_over_after_expiry(&store, &key).await;

    let outcome = alice.release_lock(&key).await.expect("release");
    assert_eq!(outcome, ReleaseOutcome::NotHeld);
    assert!(!alice.owns_lock(&key));
    assert!(!alice.has_heartbeat(&key));

    let remote = bob.get_lock(&key).await.expect("get").expect("still locked");
    assert_eq!(remote.owner_id, "user_b");
    assert!(bob.owns_lock(&key));

    alice.cleanup();
    bob.cleanup();
}

#[tokio::test]
async fn blocked_reacquire_drops_stale_local_lock() {
    let store = Arc::new(MemoryDocStore::new());
    let key = bill("123");
    let (alice, bob) = take_over_after_expiry(&store, &key).await;
    assert!(alice.owns_lock(&key));

    let outcome = alice.acquire_lock(&key).await;
    assert_eq!(outcome.reason(), Some("locked_by_other"));
    assert!(!alice.owns_lock(&key));
    assert!(!alice.has_heartbeat(&key));

    let remote = bob.get_lock(&key).await.expect("get").expect("still locked");
    assert_eq!(remote.owner_id, "user_b");
    assert!(bob.owns_lock(&key));

    alice.cleanup();
    bob.cleanup();
}

#[tokio::test]
async fn late_heartbeat_does_not_reclaim_a_taken_over_lock() {
    let store = Arc::new(MemoryDocStore::new());
    let key = bill("123");
    let alice = short_lived(store.clone(), "user_a", 200);
    let bob = short_lived(store.clone(), "user_b", 10_000);

    assert_eq!(alice.acquire_lock(&key).await, AcquireOutcome::Acquired);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bob.acquire_lock(&key).await, AcquireOutcome::Acquired);

    // Alice's first heartbeat fires at 200ms and finds bob's record.
    tokio::time::sleep(Duration::from_millis(150)).await;
    eventually(|| !alice.has_heartbeat(&key)).await;
    assert!(!alice.owns_lock(&key));

    let remote = bob.get_lock(&key).await.expect("get").expect("still locked");
    assert_eq!(remote.owner_id, "user_b");
    assert!(bob.owns_lock(&key));
    assert!(bob.has_heartbeat(&key));

    alice.cleanup();
    bob.cleanup();
}

#[tokio::test(start_paused = true)]
async fn zero_heartbeat_interval_keeps_renewing() {
    let store = Arc::new(FlakyStore::default());
    let cfg = LockConfig {
        ttl_ms: 60_000,
        heartbeat_interval_ms: 0,
    };
    let svc = DistributedLockService::new(store.clone(), cfg);
    svc.initialize(LockOwner::new("user_a"));
    let key = bill("123");

    assert_eq!(svc.acquire_lock(&key).await, AcquireOutcome::Acquired);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(svc.has_heartbeat(&key));
    assert!(store.sets.load(Ordering::SeqCst) > 2);
    assert!(svc.owns_lock(&key));

    svc.cleanup();
    assert!(!svc.has_heartbeat(&key));
}
