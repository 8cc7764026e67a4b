//! Memory service facade.
//!
//! Wires the stores, the vector index, the embedding provider and the
//! engines into the external interface: `save`, `retrieve`,
//! `run_consolidation`, `get_archived`, plus archival, maintenance and
//! backfill operations. Owner is an explicit parameter on every call;
//! configuration is an explicit struct.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use mnemo_core::{
    ArchiveEntry, ArchiveReason, ArchiveStore, MemoryConfig, MemoryError, MemoryRecord,
    MetadataMap, RecordStore, Result,
};
use mnemo_embedding::EmbeddingProvider;
use mnemo_index::HnswIndex;

use crate::backfill::{self, BackfillQueue};
use crate::consolidation::{ConsolidationEngine, ConsolidationReport, MergeStrategy};
use crate::maintenance::{MaintenanceEngine, MaintenanceReport};
use crate::retrieval::{RetrievalEngine, RetrievalFilters};

/// The memory store's external interface.
pub struct MemoryService {
    store: Arc<dyn RecordStore>,
    archive: Arc<dyn ArchiveStore>,
    index: Arc<HnswIndex>,
    retrieval: RetrievalEngine,
    consolidation: ConsolidationEngine,
    maintenance: MaintenanceEngine,
    backfill: BackfillQueue,
    worker: JoinHandle<()>,
}

impl MemoryService {
    /// Builds a service over the given stores and embedding provider with
    /// the default merge strategy, spawning the backfill worker.
    pub fn new(
        store: Arc<dyn RecordStore>,
        archive: Arc<dyn ArchiveStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: MemoryConfig,
    ) -> Self {
        Self::with_strategy(store, archive, provider, config, None)
    }

    /// Builds a service with a custom consolidation merge strategy.
    pub fn with_strategy(
        store: Arc<dyn RecordStore>,
        archive: Arc<dyn ArchiveStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: MemoryConfig,
        strategy: Option<Arc<dyn MergeStrategy>>,
    ) -> Self {
        let index = Arc::new(HnswIndex::new());
        let retrieval = RetrievalEngine::new(
            store.clone(),
            index.clone(),
            provider.clone(),
            config.retrieval.clone(),
            config.scoring.clone(),
            config.embed_timeout,
        );
        let consolidation = match strategy {
            Some(strategy) => ConsolidationEngine::with_strategy(
                store.clone(),
                archive.clone(),
                index.clone(),
                config.consolidation.clone(),
                strategy,
            ),
            None => ConsolidationEngine::new(
                store.clone(),
                archive.clone(),
                index.clone(),
                config.consolidation.clone(),
            ),
        };
        let maintenance = MaintenanceEngine::new(
            store.clone(),
            archive.clone(),
            index.clone(),
            config.scoring.clone(),
            config.maintenance.clone(),
        );
        let (backfill, worker) = backfill::spawn_backfill_worker(
            store.clone(),
            index.clone(),
            provider,
            config.embed_timeout,
        );

        Self {
            store,
            archive,
            index,
            retrieval,
            consolidation,
            maintenance,
            backfill,
            worker,
        }
    }

    /// The shared vector index (e.g. for tuning `ef_search`).
    pub fn index(&self) -> &Arc<HnswIndex> {
        &self.index
    }

    /// Persists a new memory synchronously and queues its embedding fill.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` on empty owner/content or importance outside
    /// 1–10.
    pub async fn save(
        &self,
        owner: &str,
        kind: &str,
        category: &str,
        content: &str,
        metadata: MetadataMap,
        importance: u8,
    ) -> Result<Uuid> {
        if owner.trim().is_empty() {
            return Err(MemoryError::ValidationFailed("owner is empty".to_string()));
        }
        if content.trim().is_empty() {
            return Err(MemoryError::ValidationFailed(
                "content is empty".to_string(),
            ));
        }
        if !(1..=10).contains(&importance) {
            return Err(MemoryError::ValidationFailed(format!(
                "importance {importance} outside 1..=10"
            )));
        }

        let record = MemoryRecord::new(
            owner.to_string(),
            kind.to_string(),
            category.to_string(),
            content.to_string(),
            metadata,
            importance,
        );
        let id = record.id;
        self.store.insert(record).await?;
        self.backfill.enqueue(id);
        info!(owner = %owner, id = %id, kind = %kind, "memory saved");
        Ok(id)
    }

    /// Retrieves up to `k` records ranked by composite relevance.
    pub async fn retrieve(
        &self,
        owner: &str,
        query_text: &str,
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<MemoryRecord>> {
        self.retrieval.retrieve(owner, query_text, k, filters).await
    }

    /// Runs one consolidation pass. Invoked by an external scheduler, not
    /// self-triggering.
    pub async fn run_consolidation(
        &self,
        owner: &str,
        batch_size: usize,
    ) -> Result<ConsolidationReport> {
        self.consolidation.run(owner, batch_size).await
    }

    /// Cancels the in-flight consolidation run at its next
    /// between-clusters checkpoint.
    pub fn cancel_consolidation(&self) {
        self.consolidation.request_cancel();
    }

    /// Returns the frozen copy of a removed record.
    pub async fn get_archived(&self, original_id: Uuid) -> Result<ArchiveEntry> {
        self.archive
            .get(original_id)
            .await?
            .ok_or(MemoryError::NotFound(original_id))
    }

    /// Archives a record on explicit request (reason `"manual"`).
    pub async fn archive(&self, id: Uuid) -> Result<()> {
        self.maintenance
            .archive_by_id(id, ArchiveReason::Manual)
            .await
    }

    /// Recomputes decay and priority for an owner, expiring stale records.
    pub async fn run_decay_maintenance(&self, owner: &str) -> Result<MaintenanceReport> {
        self.maintenance.run_decay_maintenance(owner).await
    }

    /// Physically deletes archived records below the purge low-water mark.
    pub async fn purge_archived(&self, owner: &str) -> Result<usize> {
        self.maintenance.purge_archived(owner).await
    }

    /// Re-queues every record still waiting for an embedding.
    pub async fn backfill_sweep(&self) -> Result<usize> {
        backfill::sweep(&*self.store, &self.backfill).await
    }

    /// Rebuilds the in-process index for one owner from the record store,
    /// e.g. after a restart.
    pub async fn reindex_owner(&self, owner: &str) -> Result<usize> {
        let live = self.store.list_live(owner).await?;
        let mut indexed = 0;
        for record in live {
            if let Some(embedding) = &record.embedding {
                self.index.insert(record.id, embedding).await?;
                indexed += 1;
            }
        }
        info!(owner = %owner, indexed = indexed, "reindexed owner");
        Ok(indexed)
    }

    /// Stops the backfill worker and waits for it to drain.
    pub async fn shutdown(self) {
        let Self {
            backfill, worker, ..
        } = self;
        drop(backfill);
        let _ = worker.await;
    }
}
