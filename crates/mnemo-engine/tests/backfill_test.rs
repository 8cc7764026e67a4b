//! Integration tests for ingestion, the backfill worker and the sweep.

mod common;

use mnemo_core::{MemoryConfig, MemoryError, MemoryRecord, MetadataMap, RecordStore};
use mnemo_engine::RetrievalFilters;

const DIM: usize = 4;

#[tokio::test]
async fn test_save_validates_input() {
    let h = common::harness(DIM, MemoryConfig::default());

    for (owner, content, importance) in [
        ("", "content", 5u8),
        ("tenant-a", "   ", 5),
        ("tenant-a", "content", 0),
        ("tenant-a", "content", 11),
    ] {
        let err = h
            .service
            .save(owner, "note", "ops", content, MetadataMap::new(), importance)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::ValidationFailed(_)));
    }
}

#[tokio::test]
async fn test_save_persists_then_fills_embedding_async() {
    let h = common::harness(DIM, MemoryConfig::default());

    let id = h
        .service
        .save("tenant-a", "note", "ops", "fresh memory", MetadataMap::new(), 7)
        .await
        .unwrap();

    // The synchronous write is visible immediately, embedding or not.
    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.importance, 7);

    // The worker fills the embedding and indexes the record.
    assert!(common::wait_for_embedding(&h.store, id).await);
    assert!(h.service.index().contains(id).await);

    let results = h
        .service
        .retrieve("tenant-a", "fresh memory", 1, &RetrievalFilters::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, id);
}

#[tokio::test]
async fn test_sweep_requeues_records_missed_by_the_worker() {
    let h = common::harness(DIM, MemoryConfig::default());

    // Written around the service, so the worker never saw it.
    let record = MemoryRecord::new(
        "tenant-a".to_string(),
        "note".to_string(),
        "ops".to_string(),
        "imported memory".to_string(),
        MetadataMap::new(),
        5,
    );
    let id = record.id;
    h.store.insert(record).await.unwrap();

    let queued = h.service.backfill_sweep().await.unwrap();
    assert_eq!(queued, 1);
    assert!(common::wait_for_embedding(&h.store, id).await);
    assert!(h.service.index().contains(id).await);
}

#[tokio::test]
async fn test_provider_failure_defers_embedding_to_later_sweep() {
    let h = common::harness(DIM, MemoryConfig::default());
    h.provider.set_failing(true);

    let id = h
        .service
        .save("tenant-a", "note", "ops", "delayed memory", MetadataMap::new(), 5)
        .await
        .unwrap();

    // Ingestion succeeded; the embedding did not.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let record = h.store.get(id).await.unwrap().unwrap();
    assert!(record.embedding.is_none());

    // The provider recovers and a sweep picks the record up.
    h.provider.set_failing(false);
    let queued = h.service.backfill_sweep().await.unwrap();
    assert_eq!(queued, 1);
    assert!(common::wait_for_embedding(&h.store, id).await);
}

#[tokio::test]
async fn test_reindex_owner_restores_search_after_restart() {
    let h = common::harness(DIM, MemoryConfig::default());

    let id = h
        .service
        .save("tenant-a", "note", "ops", "survives restarts", MetadataMap::new(), 5)
        .await
        .unwrap();
    assert!(common::wait_for_embedding(&h.store, id).await);

    // A fresh service over the same stores starts with an empty index.
    let restarted = common::TestHarness {
        service: mnemo_engine::MemoryService::new(
            h.store.clone() as std::sync::Arc<dyn RecordStore>,
            h.archive.clone() as std::sync::Arc<dyn mnemo_core::ArchiveStore>,
            h.provider.clone(),
            MemoryConfig::default(),
        ),
        store: h.store.clone(),
        archive: h.archive.clone(),
        provider: h.provider.clone(),
    };
    assert!(restarted.service.index().is_empty().await);

    let indexed = restarted.service.reindex_owner("tenant-a").await.unwrap();
    assert_eq!(indexed, 1);

    let results = restarted
        .service
        .retrieve("tenant-a", "survives restarts", 1, &RetrievalFilters::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, id);
}

#[tokio::test]
async fn test_shutdown_drains_worker() {
    let h = common::harness(DIM, MemoryConfig::default());
    let id = h
        .service
        .save("tenant-a", "note", "ops", "last words", MetadataMap::new(), 5)
        .await
        .unwrap();
    assert!(common::wait_for_embedding(&h.store, id).await);
    h.service.shutdown().await;
}
