//! Integration tests for the in-memory record and archive stores.

use chrono::{Duration, Utc};
use mnemo_core::{
    ArchiveEntry, ArchiveReason, ArchiveStore, MemoryError, MemoryRecord, MetadataMap,
    RecordStore,
};
use mnemo_store::{InMemoryArchiveStore, InMemoryRecordStore};

fn record(owner: &str, content: &str) -> MemoryRecord {
    MemoryRecord::new(
        owner.to_string(),
        "note".to_string(),
        "general".to_string(),
        content.to_string(),
        MetadataMap::new(),
        5,
    )
}

#[tokio::test]
async fn test_insert_get_update_delete() {
    let store = InMemoryRecordStore::new();
    let mut r = record("tenant-a", "first");
    let id = r.id;

    store.insert(r.clone()).await.unwrap();
    assert_eq!(store.get(id).await.unwrap().unwrap().content, "first");

    r.access_count = 3;
    store.update(r).await.unwrap();
    assert_eq!(store.get(id).await.unwrap().unwrap().access_count, 3);

    store.delete(id).await.unwrap();
    assert!(store.get(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_insert_duplicate_id_rejected() {
    let store = InMemoryRecordStore::new();
    let r = record("tenant-a", "first");

    store.insert(r.clone()).await.unwrap();
    let err = store.insert(r).await.unwrap_err();
    assert!(matches!(err, MemoryError::ValidationFailed(_)));
}

#[tokio::test]
async fn test_update_missing_record_is_not_found() {
    let store = InMemoryRecordStore::new();
    let r = record("tenant-a", "ghost");
    let err = store.update(r).await.unwrap_err();
    assert!(matches!(err, MemoryError::NotFound(_)));
}

#[tokio::test]
async fn test_list_live_excludes_archived_and_other_owners() {
    let store = InMemoryRecordStore::new();
    let live = record("tenant-a", "live");
    let mut gone = record("tenant-a", "gone");
    gone.archived = true;
    let other = record("tenant-b", "other");

    store.insert(live.clone()).await.unwrap();
    store.insert(gone.clone()).await.unwrap();
    store.insert(other).await.unwrap();

    let records = store.list_live("tenant-a").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, live.id);

    let all = store.list_by_owner("tenant-a").await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_get_many_preserves_order_and_skips_missing() {
    let store = InMemoryRecordStore::new();
    let a = record("tenant-a", "a");
    let b = record("tenant-a", "b");
    store.insert(a.clone()).await.unwrap();
    store.insert(b.clone()).await.unwrap();

    let fetched = store
        .get_many(&[b.id, uuid::Uuid::new_v4(), a.id])
        .await
        .unwrap();
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0].id, b.id);
    assert_eq!(fetched[1].id, a.id);
}

#[tokio::test]
async fn test_list_missing_embedding() {
    let store = InMemoryRecordStore::new();
    let pending = record("tenant-a", "pending");
    let mut filled = record("tenant-a", "filled");
    filled.embedding = Some(vec![0.1, 0.2]);

    store.insert(pending.clone()).await.unwrap();
    store.insert(filled).await.unwrap();

    let missing = store.list_missing_embedding().await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].id, pending.id);
}

#[tokio::test]
async fn test_archive_append_is_append_only() {
    let archive = InMemoryArchiveStore::new();
    let r = record("tenant-a", "to archive");
    let entry = ArchiveEntry::freeze(r, ArchiveReason::Manual);

    archive.append(entry.clone()).await.unwrap();
    let err = archive.append(entry.clone()).await.unwrap_err();
    assert!(matches!(err, MemoryError::ArchiveWriteFailed(_)));

    let fetched = archive.get(entry.original_id).await.unwrap().unwrap();
    assert_eq!(fetched.record.content, "to archive");
}

#[tokio::test]
async fn test_archive_list_filters_owner_and_since() {
    let archive = InMemoryArchiveStore::new();
    let a = ArchiveEntry::freeze(record("tenant-a", "a"), ArchiveReason::Expired);
    let b = ArchiveEntry::freeze(record("tenant-b", "b"), ArchiveReason::Expired);
    archive.append(a.clone()).await.unwrap();
    archive.append(b).await.unwrap();

    let since = Utc::now() - Duration::hours(1);
    let listed = archive.list("tenant-a", since).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].original_id, a.original_id);

    let future = Utc::now() + Duration::hours(1);
    assert!(archive.list("tenant-a", future).await.unwrap().is_empty());
}
