//! Integration tests for the retrieval path.
//!
//! Covers k validation, result bounds, owner/archived/category filtering,
//! the similarity floor, embedding failure, access-stat side effects and
//! rank-order idempotence. Uses the in-memory stores and the mock
//! embedding provider from tests/common.

mod common;

use mnemo_core::{MemoryConfig, MemoryError, MetadataMap, RecordStore};
use mnemo_engine::RetrievalFilters;

const DIM: usize = 4;

#[tokio::test]
async fn test_retrieve_rejects_zero_k() {
    let h = common::harness(DIM, MemoryConfig::default());
    let err = h
        .service
        .retrieve("tenant-a", "anything", 0, &RetrievalFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::ValidationFailed(_)));
}

#[tokio::test]
async fn test_retrieve_on_empty_store_returns_empty() {
    let h = common::harness(DIM, MemoryConfig::default());
    let results = h
        .service
        .retrieve("tenant-a", "anything", 5, &RetrievalFilters::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_retrieve_returns_fewer_than_k_without_error() {
    let h = common::harness(DIM, MemoryConfig::default());
    h.provider.set("memory", vec![1.0, 0.0, 0.0, 0.0]).await;
    h.provider.set("first memory", vec![0.9, 0.3, 0.0, 0.0]).await;
    h.provider.set("second memory", vec![0.8, 0.4, 0.0, 0.0]).await;

    let a = h
        .service
        .save("tenant-a", "note", "ops", "first memory", MetadataMap::new(), 5)
        .await
        .unwrap();
    let b = h
        .service
        .save("tenant-a", "note", "ops", "second memory", MetadataMap::new(), 5)
        .await
        .unwrap();
    assert!(common::wait_for_embedding(&h.store, a).await);
    assert!(common::wait_for_embedding(&h.store, b).await);

    let results = h
        .service
        .retrieve("tenant-a", "memory", 5, &RetrievalFilters::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_retrieve_is_owner_scoped_and_skips_archived() {
    let h = common::harness(DIM, MemoryConfig::default());
    h.provider.set("query", vec![1.0, 0.0, 0.0, 0.0]).await;
    h.provider.set("mine", vec![0.99, 0.1, 0.0, 0.0]).await;
    h.provider.set("theirs", vec![0.98, 0.2, 0.0, 0.0]).await;
    h.provider.set("gone", vec![0.97, 0.1, 0.1, 0.0]).await;

    let mine = h
        .service
        .save("tenant-a", "note", "ops", "mine", MetadataMap::new(), 5)
        .await
        .unwrap();
    let theirs = h
        .service
        .save("tenant-b", "note", "ops", "theirs", MetadataMap::new(), 5)
        .await
        .unwrap();
    let gone = h
        .service
        .save("tenant-a", "note", "ops", "gone", MetadataMap::new(), 5)
        .await
        .unwrap();
    for id in [mine, theirs, gone] {
        assert!(common::wait_for_embedding(&h.store, id).await);
    }
    h.service.archive(gone).await.unwrap();

    let results = h
        .service
        .retrieve("tenant-a", "query", 10, &RetrievalFilters::default())
        .await
        .unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![mine]);
}

#[tokio::test]
async fn test_retrieve_applies_category_filter() {
    let h = common::harness(DIM, MemoryConfig::default());
    h.provider.set("memory", vec![1.0, 0.0, 0.0, 0.0]).await;
    h.provider.set("ops memory", vec![0.9, 0.3, 0.0, 0.0]).await;
    h.provider.set("dev memory", vec![0.8, 0.4, 0.0, 0.0]).await;

    let ops = h
        .service
        .save("tenant-a", "note", "ops", "ops memory", MetadataMap::new(), 5)
        .await
        .unwrap();
    let dev = h
        .service
        .save("tenant-a", "note", "dev", "dev memory", MetadataMap::new(), 5)
        .await
        .unwrap();
    for id in [ops, dev] {
        assert!(common::wait_for_embedding(&h.store, id).await);
    }

    let filters = RetrievalFilters {
        category: Some("dev".to_string()),
        ..RetrievalFilters::default()
    };
    let results = h
        .service
        .retrieve("tenant-a", "memory", 10, &filters)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, dev);
}

#[tokio::test]
async fn test_retrieve_applies_similarity_floor() {
    let h = common::harness(DIM, MemoryConfig::default());
    h.provider.set("query", vec![1.0, 0.0, 0.0, 0.0]).await;
    h.provider.set("close", vec![0.95, 0.3, 0.0, 0.0]).await;
    h.provider.set("far", vec![0.0, 0.0, 1.0, 0.0]).await;

    let close = h
        .service
        .save("tenant-a", "note", "ops", "close", MetadataMap::new(), 5)
        .await
        .unwrap();
    let far = h
        .service
        .save("tenant-a", "note", "ops", "far", MetadataMap::new(), 5)
        .await
        .unwrap();
    for id in [close, far] {
        assert!(common::wait_for_embedding(&h.store, id).await);
    }

    let filters = RetrievalFilters {
        similarity_floor: Some(0.5),
        ..RetrievalFilters::default()
    };
    let results = h
        .service
        .retrieve("tenant-a", "query", 10, &filters)
        .await
        .unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![close]);
}

#[tokio::test]
async fn test_retrieve_surfaces_embedding_unavailable() {
    let h = common::harness(DIM, MemoryConfig::default());
    h.provider.set_failing(true);

    let err = h
        .service
        .retrieve("tenant-a", "query", 3, &RetrievalFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)));
}

#[tokio::test]
async fn test_retrieve_bumps_access_stats_async() {
    let h = common::harness(DIM, MemoryConfig::default());

    let id = h
        .service
        .save("tenant-a", "note", "ops", "bumped memory", MetadataMap::new(), 5)
        .await
        .unwrap();
    assert!(common::wait_for_embedding(&h.store, id).await);

    let before = h.store.get(id).await.unwrap().unwrap();
    let results = h
        .service
        .retrieve("tenant-a", "bumped memory", 1, &RetrievalFilters::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    // The response carries the pre-bump state; the bump lands afterwards.
    assert_eq!(results[0].access_count, before.access_count);

    assert!(common::wait_for_access_count(&h.store, id, 1).await);
    let after = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(after.access_count, 1);
    assert!(after.last_accessed_at >= before.last_accessed_at);
    assert!(after.decay_factor >= before.decay_factor);
}

#[tokio::test]
async fn test_retrieve_rank_order_is_stable_across_calls() {
    let h = common::harness(DIM, MemoryConfig::default());
    h.provider.set("query", vec![1.0, 0.0, 0.0, 0.0]).await;
    h.provider.set("best", vec![0.99, 0.1, 0.0, 0.0]).await;
    h.provider.set("good", vec![0.9, 0.4, 0.0, 0.0]).await;
    h.provider.set("okay", vec![0.7, 0.7, 0.0, 0.0]).await;

    for content in ["best", "good", "okay"] {
        let id = h
            .service
            .save("tenant-a", "note", "ops", content, MetadataMap::new(), 5)
            .await
            .unwrap();
        assert!(common::wait_for_embedding(&h.store, id).await);
    }

    let first = h
        .service
        .retrieve("tenant-a", "query", 3, &RetrievalFilters::default())
        .await
        .unwrap();
    let second = h
        .service
        .retrieve("tenant-a", "query", 3, &RetrievalFilters::default())
        .await
        .unwrap();

    let first_ids: Vec<_> = first.iter().map(|r| r.id).collect();
    let second_ids: Vec<_> = second.iter().map(|r| r.id).collect();
    assert_eq!(first_ids, second_ids);
    assert_eq!(first[0].content, "best");
    assert_eq!(first[2].content, "okay");
}
