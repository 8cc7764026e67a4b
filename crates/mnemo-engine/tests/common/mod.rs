//! Shared test utilities for mnemo-engine integration tests.
//!
//! Provides MockEmbeddingProvider (preset or deterministic vectors, with
//! failure injection) and a harness wiring MemoryService over the
//! in-memory stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use mnemo_core::{ArchiveStore, MemoryConfig, RecordStore};
use mnemo_embedding::EmbeddingProvider;
use mnemo_engine::MemoryService;
use mnemo_store::{InMemoryArchiveStore, InMemoryRecordStore};

/// Mock embedding provider. Returns preset vectors for known texts, a
/// deterministic pseudo-vector otherwise, and errors when failure
/// injection is on. No external calls.
pub struct MockEmbeddingProvider {
    dim: usize,
    vectors: RwLock<HashMap<String, Vec<f32>>>,
    failing: AtomicBool,
}

#[allow(dead_code)]
impl MockEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Pins the vector returned for an exact text.
    pub async fn set(&self, text: &str, vector: Vec<f32>) {
        self.vectors.write().await.insert(text.to_string(), vector);
    }

    /// Makes every embed call fail until turned off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn fallback(&self, text: &str) -> Vec<f32> {
        let seed = text.bytes().map(|b| b as usize).sum::<usize>() % 89 + 1;
        (0..self.dim)
            .map(|d| ((seed * (d + 3)) as f32 * 0.7).sin())
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, anyhow::Error> {
        if self.failing.load(Ordering::Relaxed) {
            anyhow::bail!("mock embedding provider failure");
        }
        if let Some(vector) = self.vectors.read().await.get(text) {
            return Ok(vector.clone());
        }
        Ok(self.fallback(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, anyhow::Error> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Service plus direct handles to its collaborators.
#[allow(dead_code)]
pub struct TestHarness {
    pub service: MemoryService,
    pub store: Arc<InMemoryRecordStore>,
    pub archive: Arc<InMemoryArchiveStore>,
    pub provider: Arc<MockEmbeddingProvider>,
}

#[allow(dead_code)]
pub fn harness(dim: usize, config: MemoryConfig) -> TestHarness {
    let store = Arc::new(InMemoryRecordStore::new());
    let archive = Arc::new(InMemoryArchiveStore::new());
    let provider = Arc::new(MockEmbeddingProvider::new(dim));

    let service = MemoryService::new(
        store.clone() as Arc<dyn RecordStore>,
        archive.clone() as Arc<dyn ArchiveStore>,
        provider.clone(),
        config,
    );

    TestHarness {
        service,
        store,
        archive,
        provider,
    }
}

/// Polls until the record has an embedding (filled by the backfill
/// worker). Returns false after ~2s.
#[allow(dead_code)]
pub async fn wait_for_embedding(store: &InMemoryRecordStore, id: Uuid) -> bool {
    for _ in 0..200 {
        if let Ok(Some(record)) = store.get(id).await {
            if record.embedding.is_some() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Polls until the record's access count reaches `count`. Returns false
/// after ~2s.
#[allow(dead_code)]
pub async fn wait_for_access_count(store: &InMemoryRecordStore, id: Uuid, count: u64) -> bool {
    for _ in 0..200 {
        if let Ok(Some(record)) = store.get(id).await {
            if record.access_count >= count {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
