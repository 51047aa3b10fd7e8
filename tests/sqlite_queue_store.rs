use tempfile::TempDir;

use budgetsync::{
    persist::{sqlite::SqliteQueueStore, QueueStore},
    queue::entry::{EntryPatch, EntryStatus, QueuedResource},
};

fn resource(name: &str) -> QueuedResource {
    QueuedResource::new("attachment", name, name.as_bytes().to_vec())
        .with_metadata(serde_json::json!({ "budgetId": "b-1", "size": name.len() }))
}

#[test]
fn entries_survive_reopen_in_insertion_order() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("queue.db");

    let ids = {
        let mut store = SqliteQueueStore::open(&db_path).expect("open sqlite");
        let a = store.add(&resource("a.png"), 10).expect("add a");
        let b = store.add(&resource("b.png"), 20).expect("add b");
        let c = store.add(&resource("c.png"), 30).expect("add c");
        vec![a, b, c]
    };

    let store = SqliteQueueStore::open(&db_path).expect("reopen sqlite");
    let entries = store.to_array(None).expect("list");
    assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
    assert_eq!(
        entries.iter().map(|e| e.resource.name.as_str()).collect::<Vec<_>>(),
        vec!["a.png", "b.png", "c.png"]
    );

    let first = &entries[0];
    assert_eq!(first.status, EntryStatus::Pending);
    assert_eq!(first.retry_count, 0);
    assert_eq!(first.created_at, 10);
    assert_eq!(first.last_attempt_at, None);
    assert_eq!(first.last_error, None);
    assert_eq!(first.resource, resource("a.png"));
}

#[test]
fn patch_updates_only_named_fields() {
    let mut store = SqliteQueueStore::open_in_memory().expect("sqlite");
    let id = store.add(&resource("x.pdf"), 5).expect("add");

    let patched = store
        .update(
            id,
            &EntryPatch {
                status: Some(EntryStatus::Processing),
                last_attempt_at: Some(99),
                ..EntryPatch::default()
            },
        )
        .expect("update");
    assert!(patched);

    store
        .update(
            id,
            &EntryPatch {
                retry_count: Some(3),
                last_error: Some("timeout".to_string()),
                ..EntryPatch::default()
            },
        )
        .expect("update");

    let entry = store.get(id).expect("get").expect("present");
    assert_eq!(entry.status, EntryStatus::Processing);
    assert_eq!(entry.retry_count, 3);
    assert_eq!(entry.last_attempt_at, Some(99));
    assert_eq!(entry.last_error.as_deref(), Some("timeout"));

    assert_eq!(store.count(Some(EntryStatus::Processing)).expect("count"), 1);
    assert_eq!(store.count(Some(EntryStatus::Pending)).expect("count"), 0);
    assert!(store.to_array(Some(EntryStatus::Pending)).expect("list").is_empty());

    assert!(!store.update(id + 100, &EntryPatch::default()).expect("missing"));
}

#[test]
fn delete_and_clear() {
    let mut store = SqliteQueueStore::open_in_memory().expect("sqlite");
    let a = store.add(&resource("a"), 1).expect("add");
    store.add(&resource("b"), 2).expect("add");
    store.add(&resource("c"), 3).expect("add");

    assert!(store.delete(a).expect("delete"));
    assert!(!store.delete(a).expect("delete twice"));
    assert!(store.get(a).expect("get").is_none());
    assert_eq!(store.count(None).expect("count"), 2);

    assert_eq!(store.clear().expect("clear"), 2);
    assert_eq!(store.count(None).expect("count"), 0);

    // Ids keep increasing after a clear.
    let d = store.add(&resource("d"), 4).expect("add");
    assert!(d > a);
}
