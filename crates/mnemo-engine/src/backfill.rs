//! Embedding backfill.
//!
//! Ingestion persists records synchronously with a null embedding; this
//! module fills embeddings best-effort off the write path. A task queue
//! feeds a dedicated worker; provider failures and timeouts leave the
//! record untouched for the next sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mnemo_core::{RecordStore, Result};
use mnemo_embedding::EmbeddingProvider;
use mnemo_index::HnswIndex;

/// Handle for enqueueing records awaiting an embedding.
#[derive(Clone)]
pub struct BackfillQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

impl BackfillQueue {
    /// Queues a record for embedding. Dropping the send silently is fine:
    /// the record stays embedding-less and the next sweep re-queues it.
    pub fn enqueue(&self, id: Uuid) {
        if self.tx.send(id).is_err() {
            warn!(id = %id, "backfill worker stopped, record left for next sweep");
        }
    }
}

/// Spawns the backfill worker and returns its queue handle.
///
/// The worker runs until every `BackfillQueue` clone is dropped.
pub fn spawn_backfill_worker(
    store: Arc<dyn RecordStore>,
    index: Arc<HnswIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    embed_timeout: Duration,
) -> (BackfillQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        info!("backfill worker started");
        while let Some(id) = rx.recv().await {
            fill_one(&*store, &index, &*provider, embed_timeout, id).await;
        }
        info!("backfill worker stopped");
    });
    (BackfillQueue { tx }, handle)
}

/// Embeds one record and inserts it into the vector index. Every failure
/// path is deferred, never fatal.
async fn fill_one(
    store: &dyn RecordStore,
    index: &HnswIndex,
    provider: &dyn EmbeddingProvider,
    embed_timeout: Duration,
    id: Uuid,
) {
    let record = match store.get(id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            debug!(id = %id, "backfill: record gone, skipping");
            return;
        }
        Err(e) => {
            warn!(id = %id, error = %e, "backfill: record read failed");
            return;
        }
    };
    if record.archived {
        debug!(id = %id, "backfill: record archived, skipping");
        return;
    }
    if let Some(embedding) = &record.embedding {
        // Already filled (e.g. re-queued by a sweep racing the worker);
        // just make sure the index has it.
        if let Err(e) = index.insert(id, embedding).await {
            warn!(id = %id, error = %e, "backfill: index insert failed");
        }
        return;
    }

    let embedding = match timeout(embed_timeout, provider.embed(&record.content)).await {
        Ok(Ok(embedding)) => embedding,
        Ok(Err(e)) => {
            warn!(id = %id, error = %e, "backfill: embedding failed, deferred to sweep");
            return;
        }
        Err(_) => {
            warn!(
                id = %id,
                timeout_ms = embed_timeout.as_millis() as u64,
                "backfill: embedding timed out, deferred to sweep"
            );
            return;
        }
    };

    let mut record = record;
    record.embedding = Some(embedding.clone());
    record.updated_at = Utc::now();
    if let Err(e) = store.update(record).await {
        warn!(id = %id, error = %e, "backfill: record update failed");
        return;
    }
    if let Err(e) = index.insert(id, &embedding).await {
        warn!(id = %id, error = %e, "backfill: index insert failed");
        return;
    }
    info!(id = %id, dimension = embedding.len(), "backfill: embedding filled");
}

/// Re-queues every live record still missing an embedding. Returns the
/// number queued.
pub async fn sweep(store: &dyn RecordStore, queue: &BackfillQueue) -> Result<usize> {
    let pending = store.list_missing_embedding().await?;
    for record in &pending {
        queue.enqueue(record.id);
    }
    info!(queued = pending.len(), "backfill sweep queued pending records");
    Ok(pending.len())
}
